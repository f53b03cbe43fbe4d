use std::time::Duration;

use cgilink::connection::{connect_child, Connection, ConnectionConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cmd::{build_runtime, parse_duration, CallArgs, RUNTIME_SHUTDOWN_GRACE};
use crate::exit::{connection_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

/// How long the backend gets to exit after its stdin closes.
const BACKEND_EXIT_GRACE: Duration = Duration::from_secs(1);

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = parse_payload(args.json.as_deref())?;
    let config = ConnectionConfig {
        max_line_length: args.max_line_length,
        request_timeout: Some(parse_duration(&args.timeout)?),
        ..ConnectionConfig::default()
    };
    let Some((program, program_args)) = args.command.split_first() else {
        return Err(CliError::new(USAGE, "missing backend program"));
    };

    let runtime = build_runtime()?;
    let result = runtime.block_on(call(config, &args.msg_type, payload, program, program_args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    let reply = result?;
    print_reply(&args.msg_type, &reply, format);
    Ok(SUCCESS)
}

fn parse_payload(json: Option<&str>) -> CliResult<Value> {
    match json {
        Some(text) => serde_json::from_str(text)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}"))),
        None => Ok(Value::Null),
    }
}

async fn call(
    config: ConnectionConfig,
    msg_type: &str,
    payload: Value,
    program: &str,
    program_args: &[String],
) -> CliResult<Value> {
    let conn = Connection::new(config);
    let (mut backend, listener) = connect_child(&conn, program, program_args)
        .map_err(|err| connection_error(&format!("failed to start {program}"), err))?;

    let reply = conn.send_request(msg_type, payload).await;

    conn.close().await;
    match listener.await {
        Ok(Ok(reason)) => debug!(%reason, "connection closed"),
        Ok(Err(err)) => debug!(error = %err, "connection failed"),
        Err(err) => warn!(error = %err, "listener task failed"),
    }

    match tokio::time::timeout(BACKEND_EXIT_GRACE, backend.wait()).await {
        Ok(Ok(status)) if !status.success() => warn!(%status, "backend exited unsuccessfully"),
        Ok(Ok(_)) => {}
        Ok(Err(err)) => warn!(error = %err, "waiting for backend failed"),
        Err(_) => {
            warn!(pid = ?backend.id(), "backend did not exit, killing it");
            if let Err(err) = backend.kill().await {
                warn!(error = %err, "failed to kill backend");
            }
        }
    }

    reply.map_err(|err| connection_error(&format!("{msg_type} failed"), err))
}
