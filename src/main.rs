//! Baton - 多智能体接力编排
//!
//! 入口：初始化日志、创建编排器，以命令行参数（或标准输入的一行）作为用户消息跑一轮接力，
//! 流式打印各智能体输出；Ctrl+C 停止当前接力。

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;

use baton::core::create_relay;
use baton::observability;
use baton::relay::RelayEvent;

fn read_user_message() -> anyhow::Result<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args.join(" "));
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read user message from stdin")?;
    Ok(line)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("BATON_CONFIG").ok().map(PathBuf::from);
    let relay = create_relay(config_path);
    if relay.directory().is_empty() {
        bail!("No agents configured (expected config/agents.toml or relay.agents_file)");
    }

    let message = read_user_message()?;
    let mut events = relay.subscribe();
    let turn_id = relay
        .try_start(&message)
        .await
        .context("Failed to start relay")?;

    // 每条消息已打印的字节数，MessageChunk 携带的是累计全文
    let mut printed: HashMap<usize, usize> = HashMap::new();
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                relay.stop_relay().await;
            }
            event = events.recv() => match event {
                Ok(RelayEvent::StepStarted { agent, revised_by, .. }) => {
                    match revised_by {
                        Some(requester) => println!("\n=== {} (revision requested by {}) ===", agent, requester),
                        None => println!("\n=== {} ===", agent),
                    }
                }
                Ok(RelayEvent::MessageChunk { index, text, .. }) => {
                    let done = printed.entry(index).or_insert(0);
                    if text.len() < *done {
                        // 重试前消息被清空
                        println!("\n[retrying]");
                        *done = 0;
                    }
                    if let Some(delta) = text.get(*done..) {
                        print!("{}", delta);
                        stdout.flush().ok();
                    }
                    *done = text.len();
                }
                Ok(RelayEvent::StepCompleted { text, fallback, .. }) => {
                    if fallback {
                        print!("{}", text);
                    }
                    println!();
                }
                Ok(RelayEvent::RevisionDropped { requester, target, reason }) => {
                    println!("\n[revision from {} to {} dropped: {}]", requester, target, reason);
                }
                Ok(RelayEvent::RelayFinished { turn_id: id })
                | Ok(RelayEvent::RelayCancelled { turn_id: id }) if id == turn_id => break,
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Skipped {} relay events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
    relay.wait_idle().await;

    let snapshot = relay.snapshot().await;
    if let Some(turn) = snapshot.latest_turn() {
        println!("\n--- turn {} ---", turn.id);
        for (i, message) in turn.messages.iter().enumerate() {
            let marker = message
                .revised_by
                .as_deref()
                .map(|r| format!(" (revised for {})", r))
                .unwrap_or_default();
            let first_line = message.text.lines().next().unwrap_or("");
            println!("{:>2}. {}{}: {}", i + 1, message.agent.name, marker, first_line);
        }
    }

    Ok(())
}
