use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    payload: &'a Value,
    timestamp: String,
}

pub fn print_reply(msg_type: &str, payload: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                msg_type,
                payload,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "PAYLOAD"])
                .add_row(vec![msg_type.to_string(), payload.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let rendered =
                serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
            println!("type={msg_type}\n{rendered}");
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

/// Compact payload JSON and a newline, nothing else.
pub fn print_raw(payload: &Value) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{payload}");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
