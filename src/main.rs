//! Medassist - Rust 医疗咨询助手
//!
//! 入口：初始化日志、加载配置、创建问诊编排器，并运行命令行交互循环。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use medassist::advice::render_report;
use medassist::config::{load_config, AppConfig};
use medassist::core::{create_consultation, Command, SessionEvent, SessionEventKind, Submission};
use medassist::intake::PatientInfo;
use medassist::llm::{ModelCatalog, ModelSpec};
use medassist::memory::format_history;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, oneshot};

type InputLines = Lines<BufReader<Stdin>>;

/// 打印提示并读取一行；EOF 时返回 None
async fn prompt(lines: &mut InputLines, label: &str) -> anyhow::Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

async fn optional(lines: &mut InputLines, label: &str) -> anyhow::Result<String> {
    Ok(prompt(lines, label).await?.unwrap_or_default())
}

async fn choose_model(
    lines: &mut InputLines,
    catalog: &ModelCatalog,
    default_model: &str,
) -> anyhow::Result<(String, ModelSpec)> {
    println!("可选模型：");
    for (i, entry) in catalog.entries().iter().enumerate() {
        let mode = if entry.structured_output { "JSON" } else { "文本" };
        println!("  {}. {} ({})", i + 1, entry.name, mode);
    }
    let input = prompt(lines, &format!("选择模型 [默认 {default_model}]: "))
        .await?
        .unwrap_or_default();
    let name = match input.parse::<usize>() {
        Ok(n) if (1..=catalog.entries().len()).contains(&n) => catalog.entries()[n - 1].name.clone(),
        _ => input,
    };
    Ok(catalog.select(&name, default_model))
}

async fn read_patient(lines: &mut InputLines, symptoms: String) -> anyhow::Result<PatientInfo> {
    let age = optional(lines, "年龄 (可留空): ").await?;
    let gender = optional(lines, "性别 (可留空): ").await?;
    let conditions = optional(lines, "既有疾病 (可留空): ").await?;
    let medications = optional(lines, "当前用药 (可留空): ").await?;
    let allergies = optional(lines, "过敏史 (可留空): ").await?;
    Ok(PatientInfo {
        age,
        gender,
        symptoms,
        conditions,
        medications,
        allergies,
    })
}

/// 打印事件直到本次会话结束；Ctrl+C 取消当前生成
async fn follow_session(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    cmd_tx: &mpsc::UnboundedSender<Command>,
) -> anyhow::Result<()> {
    loop {
        let event = tokio::select! {
            event = events.recv() => event.context("consultation stopped")?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n[正在停止生成...]");
                cmd_tx.send(Command::Cancel).ok();
                continue;
            }
        };

        match event.kind {
            SessionEventKind::Phase { phase } => tracing::debug!(session = %event.session, "{}", phase),
            SessionEventKind::Content { text, is_error: false } => {
                print!("{text}");
                std::io::stdout().flush()?;
            }
            SessionEventKind::Content { text, is_error: true } => println!("\n[{text}]"),
            SessionEventKind::Completed { advice } => {
                println!("\n\n{}", render_report(&advice));
                return Ok(());
            }
            SessionEventKind::Failed { message, raw } => {
                println!("\n\n错误: {message}");
                if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
                    println!("无法解析建议格式，原始API响应:\n{raw}");
                }
                return Ok(());
            }
            SessionEventKind::Cancelled => {
                println!("\n[已取消]");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medassist::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let catalog = cfg.catalog();

    let runtime = create_consultation(&cfg).context("Failed to create consultation")?;
    let cmd_tx = runtime.commands;
    let mut events = runtime.events;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", "=".repeat(60));
    println!("Medassist 医疗咨询助手 (命令: /new 新对话, /history 历史, /quit 退出)");
    println!("{}", "=".repeat(60));

    let (model_name, model) = choose_model(&mut lines, &catalog, &cfg.llm.default_model).await?;
    println!("使用模型: {model_name}\n");

    loop {
        let Some(input) = prompt(&mut lines, "\n症状描述: ").await? else {
            break;
        };
        match input.as_str() {
            "" => {
                println!("错误：请输入症状描述");
                continue;
            }
            "/quit" => break,
            "/new" => {
                cmd_tx.send(Command::Clear).ok();
                println!("已开始新对话");
                continue;
            }
            "/history" => {
                let (tx, rx) = oneshot::channel();
                cmd_tx.send(Command::History(tx)).ok();
                let history = rx.await.unwrap_or_default();
                if history.is_empty() {
                    println!("暂无对话历史");
                } else {
                    println!("{}", format_history(&history));
                }
                continue;
            }
            _ => {}
        }

        let patient = read_patient(&mut lines, input).await?;
        let text = match patient.to_user_turn() {
            Ok(text) => text,
            Err(e) => {
                println!("错误：{e}");
                continue;
            }
        };

        cmd_tx
            .send(Command::Submit(Submission::new(
                text,
                model.clone(),
                cfg.llm.temperature,
            )))
            .context("consultation stopped")?;
        follow_session(&mut events, &cmd_tx).await?;
    }

    cmd_tx.send(Command::Quit).ok();
    runtime
        .task
        .await
        .context("consultation task failed during shutdown")?;
    Ok(())
}
