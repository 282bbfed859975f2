//! 帧驱动传输的演示宿主：以约 60 Hz 的主循环驱动服务端或客户端。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin ping_host -- server 7000
//! cargo run --bin ping_host -- client 127.0.0.1 7000
//! ```
//! - 服务端对每条 `PING` 单播回复 `PONG`，其余消息原样广播给所有连接；
//! - 客户端每秒发送一次 `PING`，收到 10 次 `PONG` 后请求断开并退出；
//! - `SPARK_PUMP_CONFIG` 指向 TOML 文件时，从中读取 [`TransportConfig`]；
//! - 日志级别由 `RUST_LOG` 控制，默认 `info`。

use std::env;
use std::fs;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use spark_transport_pump::{FrameTransport, Origin, TransportConfig, TransportMode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const FRAME: Duration = Duration::from_micros(16_667);
const PING_INTERVAL: Duration = Duration::from_secs(1);
const PONGS_BEFORE_EXIT: u32 = 10;

enum Command {
    Server { port: u16 },
    Client { address: String, port: u16 },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(message) = run() {
        error!(%message, "ping_host failed");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let command = parse_args(env::args().skip(1))?;
    let config = load_config()?;
    let mut transport = FrameTransport::new(config).map_err(|err| err.to_string())?;
    transport.startup();

    let outcome = match command {
        Command::Server { port } => serve(&mut transport, port),
        Command::Client { address, port } => ping(&mut transport, &address, port),
    };
    transport.shutdown();
    outcome
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Command, String> {
    let args: Vec<String> = args
        .filter(|arg| arg.trim_start_matches('-') != "quick")
        .collect();
    match args.as_slice() {
        [role, port] if role == "server" => Ok(Command::Server {
            port: parse_port(port)?,
        }),
        [role, address, port] if role == "client" => Ok(Command::Client {
            address: address.clone(),
            port: parse_port(port)?,
        }),
        _ => Err("usage: ping_host server <port> | ping_host client <ipv4> <port>".to_owned()),
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse().map_err(|_| format!("`{raw}` is not a valid port"))
}

fn load_config() -> Result<TransportConfig, String> {
    let Ok(path) = env::var("SPARK_PUMP_CONFIG") else {
        return Ok(TransportConfig::default());
    };
    let source = fs::read_to_string(&path).map_err(|err| format!("{path}: {err}"))?;
    TransportConfig::from_toml_str(&source).map_err(|err| format!("{path}: {err}"))
}

fn serve(transport: &mut FrameTransport, port: u16) -> Result<(), String> {
    transport.start_server(port).map_err(|err| err.to_string())?;
    info!(addr = ?transport.listen_addr(), "serving; press Ctrl-C to stop");
    loop {
        let started = Instant::now();
        transport.begin_frame_pump();
        for message in transport.retrieve_incoming_messages() {
            let Origin::Client(id) = message.origin else {
                continue;
            };
            let queued = if message.text == "PING" {
                transport.queue_outgoing_string_to_client(id, "PONG")
            } else {
                transport.queue_outgoing_string(message.text)
            };
            queued.map_err(|err| err.to_string())?;
        }
        transport.end_frame_pump();
        sleep_rest_of_frame(started);
    }
}

fn ping(transport: &mut FrameTransport, address: &str, port: u16) -> Result<(), String> {
    transport
        .start_client(address, port)
        .map_err(|err| err.to_string())?;
    let mut last_ping: Option<Instant> = None;
    let mut pongs = 0;
    loop {
        let started = Instant::now();
        transport.begin_frame_pump();

        match transport.mode() {
            TransportMode::ClientConnected => {}
            TransportMode::ClientConnecting => {
                transport.end_frame_pump();
                sleep_rest_of_frame(started);
                continue;
            }
            _ if pongs >= PONGS_BEFORE_EXIT => return Ok(()),
            mode => return Err(format!("connection ended while {mode}")),
        }

        for text in transport.retrieve_incoming_strings() {
            info!(%text, "received");
            if text == "PONG" {
                pongs += 1;
            }
        }
        if pongs >= PONGS_BEFORE_EXIT {
            transport.request_disconnect();
        } else if last_ping.is_none_or(|at| at.elapsed() >= PING_INTERVAL) {
            transport
                .queue_outgoing_string("PING")
                .map_err(|err| err.to_string())?;
            last_ping = Some(started);
        }

        transport.end_frame_pump();
        sleep_rest_of_frame(started);
    }
}

fn sleep_rest_of_frame(started: Instant) {
    if let Some(rest) = FRAME.checked_sub(started.elapsed()) {
        thread::sleep(rest);
    }
}
