use std::time::Duration;

use cgilink::connection::{
    CloseReason, Connection, ConnectionConfig, ConnectionError, HandlerError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::cmd::{build_runtime, parse_duration, ServeArgs, RUNTIME_SHUTDOWN_GRACE};
use crate::exit::{connection_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};

#[derive(Debug, Deserialize)]
struct DelayRequest {
    ms: u64,
    #[serde(default)]
    echo: Value,
}

#[derive(Debug, Serialize)]
struct VersionReply {
    name: &'static str,
    version: &'static str,
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = ConnectionConfig {
        max_line_length: args.max_line_length,
        drain_timeout: parse_duration(&args.drain_timeout)?,
        ..ConnectionConfig::default()
    };

    let runtime = build_runtime()?;
    let result = runtime.block_on(serve(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn serve(config: ConnectionConfig) -> CliResult<i32> {
    let conn = Connection::new(config);
    register_builtins(&conn).map_err(|err| connection_error("handler setup failed", err))?;

    let mut listener = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.listen_stdio().await })
    };
    info!(handlers = ?conn.dispatcher().handlers().message_types(), "serving on stdio");

    let joined = tokio::select! {
        joined = &mut listener => joined,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            conn.close().await;
            listener.await
        }
    };

    let reason = joined
        .map_err(|err| CliError::new(INTERNAL, format!("listener task failed: {err}")))?
        .map_err(|err| connection_error("serve failed", err))?;
    info!(%reason, "connection closed");

    match reason {
        CloseReason::Failed(message) => Err(CliError::new(FAILURE, message)),
        CloseReason::EndOfStream | CloseReason::Shutdown => Ok(SUCCESS),
    }
}

/// Handlers every `serve` instance answers.
///
/// - `ping` replies with its payload.
/// - `delay` sleeps `ms` milliseconds, then replies with `echo`.
/// - `version` replies with the crate name and version.
fn register_builtins(conn: &Connection) -> Result<(), ConnectionError> {
    conn.on("ping", |payload: Value| async move {
        Ok::<_, HandlerError>(payload)
    })?;
    conn.on("delay", |request: DelayRequest| async move {
        tokio::time::sleep(Duration::from_millis(request.ms)).await;
        Ok::<_, HandlerError>(request.echo)
    })?;
    conn.on("version", |_: Value| async move {
        Ok::<_, HandlerError>(VersionReply {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        })
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn served() -> Connection {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = Connection::default();
        register_builtins(&server).unwrap();
        let client = Connection::default();
        for (conn, stream) in [(server, b), (client.clone(), a)] {
            let (reader, writer) = tokio::io::split(stream);
            tokio::spawn(async move { conn.listen(reader, writer).await });
        }
        client
    }

    #[tokio::test]
    async fn ping_echoes_payload() {
        let client = served();
        let reply = client
            .send_request("ping", json!({"n": [1, 2, 3]}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"n": [1, 2, 3]}));
    }

    #[tokio::test]
    async fn delay_replies_with_echo() {
        let client = served();
        let reply = client
            .send_request("delay", json!({"ms": 10, "echo": "late"}))
            .await
            .unwrap();
        assert_eq!(reply, json!("late"));
    }

    #[tokio::test]
    async fn delay_rejects_bad_payload() {
        let client = served();
        let err = client
            .send_request("delay", json!({"ms": "soon"}))
            .await
            .unwrap_err();
        match err {
            ConnectionError::Remote(info) => {
                assert_eq!(info.code, cgilink::message::ErrorCode::InvalidPayload)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn version_reports_package() {
        let client = served();
        let reply = client.send_request("version", Value::Null).await.unwrap();
        assert_eq!(reply["name"], "cgilink");
        assert_eq!(reply["version"], env!("CARGO_PKG_VERSION"));
    }
}
