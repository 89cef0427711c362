//! Mnemo - Rust 认知运行时
//!
//! 入口：初始化日志与配置，构建运行时，逐行读取 stdin 并打印回复。
//! 输入 :sleep 手动触发睡眠，:mood 查看情绪快照，Ctrl-D 退出。

use std::io::{BufRead, Write};

use anyhow::Context;
use mnemo::config::load_config;
use mnemo::CognitiveRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mnemo::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let runtime = CognitiveRuntime::from_config(&cfg).context("Failed to build runtime")?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    print!("> ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            print!("> ");
            stdout.flush()?;
            continue;
        }

        match input {
            ":sleep" => match runtime.trigger_consolidation().await {
                Some(record) => println!(
                    "consolidated: scanned {} promoted {} evicted {}",
                    record.entries_scanned, record.entries_promoted, record.entries_evicted
                ),
                None => println!("consolidation already running"),
            },
            ":mood" => {
                for (name, value) in runtime.get_emotional_snapshot().await.as_pairs() {
                    println!("{:12} {:+.2}", name, value);
                }
            }
            _ => {
                let reply = runtime.process(input).await;
                if reply.degraded {
                    println!("(degraded) {}", reply.text);
                } else {
                    println!("{}", reply.text);
                }
            }
        }
        print!("> ");
        stdout.flush()?;
    }

    runtime.shutdown();
    Ok(())
}
