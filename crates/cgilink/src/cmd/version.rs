use std::time::Duration;

use cgilink::connection::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_FLUSH_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY};
use cgilink::frame::DEFAULT_MAX_LINE_LENGTH;
use cgilink::message::{MessageKind, FIELD_SEPARATOR};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

const KINDS: [MessageKind; 4] = [
    MessageKind::Request,
    MessageKind::Response,
    MessageKind::Error,
    MessageKind::Notification,
];

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cgilink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    for (key, value) in facts() {
        println!("{key}: {value}");
    }
    Ok(SUCCESS)
}

/// Build and wire facts a peer implementation needs to interoperate.
fn facts() -> Vec<(&'static str, String)> {
    let tags: Vec<String> = KINDS
        .iter()
        .map(|kind| format!("{kind:?}={}", kind.tag()))
        .collect();

    vec![
        ("name", "cgilink".to_owned()),
        ("version", env!("CARGO_PKG_VERSION").to_owned()),
        (
            "target",
            option_env!("CGILINK_BUILD_TARGET")
                .unwrap_or("unknown")
                .to_owned(),
        ),
        (
            "frame",
            format!("<type>{sep}<correlationId>{sep}<kind>{sep}<json>\\n", sep = "\\t"),
        ),
        ("field_separator", format!("{:?}", FIELD_SEPARATOR)),
        ("kind_tags", tags.join(", ")),
        ("max_line_length", DEFAULT_MAX_LINE_LENGTH.to_string()),
        ("outbound_capacity", DEFAULT_OUTBOUND_CAPACITY.to_string()),
        ("drain_timeout", seconds(DEFAULT_DRAIN_TIMEOUT)),
        ("flush_timeout", seconds(DEFAULT_FLUSH_TIMEOUT)),
    ]
}

fn seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}
