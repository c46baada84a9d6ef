//! Subcommand handlers.

use crate::config::LoomConfig;
use crate::console::{self, ApprovalMode};
use crate::runtime;
use loom_agent::ooda::OodaEvent;
use loom_agent::{
    AssistantReply, ImprovementRequest, IssueCategory, LearningMemory, ProjectContext,
    RequestKind, RiskPolicy, classify_request,
};
use loom_tools::ToolRegistry;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;

const PROJECT_FILES_MAX: usize = 50;

pub async fn chat(
    cfg: &LoomConfig,
    project: Option<String>,
    open_file: Option<String>,
) -> anyhow::Result<()> {
    let console = console::spawn(ApprovalMode::Prompt);
    let rt = runtime::build(cfg, console.approver, console.notifier)?;
    let project = project_context(&rt.workspace_root, project, open_file).await;
    let mut transcript = Vec::new();

    eprintln!(
        "loom chat ({}). /clear resets the conversation, /exit quits.",
        cfg.general.model
    );
    while let Some(line) = read_line("> ").await? {
        let input = line.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                transcript.clear();
                eprintln!("conversation cleared");
                continue;
            }
            _ => {}
        }

        match rt.assistant.handle(&mut transcript, input, Some(&project)).await {
            Ok(reply) => {
                println!("{}\n", reply.text());
                if let AssistantReply::Chat(outcome) = &reply {
                    tracing::debug!(
                        provider_calls = outcome.provider_calls,
                        tokens = outcome.usage.total(),
                        iteration_limit_reached = outcome.iteration_limit_reached,
                        "turn finished"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(%e, "turn failed");
                eprintln!("error: {e}");
            }
        }
    }
    Ok(())
}

pub async fn improve(
    cfg: &LoomConfig,
    issue: &str,
    files: Vec<String>,
    category: Option<&str>,
    approvals: ApprovalMode,
) -> anyhow::Result<()> {
    let console = console::spawn(approvals);
    let rt = runtime::build(cfg, console.approver, console.notifier)?;
    let engine = rt
        .ooda()
        .filter(|e| e.is_ready())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "improvement engine unavailable: enable [ooda] and set ooda.api_key \
                 or LOOM_OODA_API_KEY"
            )
        })?
        .clone();

    let category = resolve_category(issue, category)?;
    let project = project_context(&rt.workspace_root, None, None).await;
    let request = ImprovementRequest::new(issue, category)
        .with_affected_files(files)
        .with_project(project);

    let mut events = engine.subscribe();
    let cycle_fut = engine.run_cycle(request);
    tokio::pin!(cycle_fut);
    let cycle = loop {
        tokio::select! {
            cycle = &mut cycle_fut => break cycle,
            Some(event) = events.recv() => print_event(&event),
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    println!("{}", cycle.summary());
    for fix in &cycle.proposed_fixes {
        println!("  {} {}: {}", fix.kind.as_str(), fix.file_path, fix.explanation);
    }
    println!("tokens used: {}", cycle.token_usage);

    if !cycle.succeeded() {
        return Err(anyhow::anyhow!("improvement cycle {} failed", cycle.id));
    }
    Ok(())
}

pub fn tools(cfg: &LoomConfig) -> anyhow::Result<()> {
    let registry = ToolRegistry::builtin()?;
    let policy = RiskPolicy::new(cfg.security.risk_overrides.clone());
    let stats = registry.stats();

    println!("{} tools", stats.total);
    for (category, count) in &stats.by_category {
        println!("  {category}: {count}");
    }
    for (risk, count) in &stats.by_risk_level {
        println!("  {risk}: {count}");
    }
    println!();
    for tool in registry.get_all() {
        let effective = policy.effective_level(tool);
        let marker = if effective == tool.risk_level {
            String::new()
        } else {
            format!(" (default {})", tool.risk_level)
        };
        println!(
            "{:<28} {:<8} {}{marker}",
            tool.name,
            effective.as_str(),
            tool.category
        );
    }
    Ok(())
}

pub async fn audit(cfg: &LoomConfig, limit: usize) -> anyhow::Result<()> {
    let (audit, _) = runtime::open_stores(cfg)?;
    let entries = audit.read_all().await?;
    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!("{}", serde_json::to_string(entry)?);
    }
    Ok(())
}

pub async fn patterns(cfg: &LoomConfig) -> anyhow::Result<()> {
    let (_, store) = runtime::open_stores(cfg)?;
    let patterns = LearningMemory::new(store).patterns().await?;
    if patterns.is_empty() {
        println!("no patterns recorded yet");
    }
    for p in patterns {
        println!(
            "{:<14} {}/{} ({:.0}%) last used {}  {}",
            p.category.as_str(),
            p.successes,
            p.total_uses,
            p.success_rate * 100.0,
            p.last_used.format("%Y-%m-%d %H:%M"),
            p.description
        );
    }
    Ok(())
}

pub async fn doctor(cfg: &LoomConfig) -> anyhow::Result<()> {
    let mut problems = Vec::new();

    let chat = cfg.chat_provider_config();
    println!("model: {} ({})", chat.model, chat.provider);
    if chat.provider.requires_api_key() && chat.api_key.is_none() {
        problems.push(format!("no api key configured for {}", chat.provider));
    }

    let root = cfg.workspace_root();
    match tokio::fs::metadata(&root).await {
        Ok(m) if m.is_dir() => println!("workspace: {}", root.display()),
        Ok(_) => problems.push(format!(
            "workspace root is not a directory: {}",
            root.display()
        )),
        Err(e) => problems.push(format!("workspace root {}: {e}", root.display())),
    }

    match runtime::open_stores(cfg) {
        Ok(_) => println!("storage: {:?} ok", cfg.storage.backend),
        Err(e) => problems.push(format!("storage: {e}")),
    }

    match cfg.ooda_provider_config() {
        None => println!("ooda: disabled"),
        Some(ooda) if ooda.provider.requires_api_key() && ooda.api_key.is_none() => {
            println!("ooda: no api key; improvement requests fall back to chat")
        }
        Some(ooda) => println!("ooda: {} ({})", ooda.model, ooda.provider),
    }

    match tokio::process::Command::new("git").arg("--version").output().await {
        Ok(out) if out.status.success() => {
            println!("git: {}", String::from_utf8_lossy(&out.stdout).trim())
        }
        _ => println!("git: not available; version-control tools will fail"),
    }

    if problems.is_empty() {
        println!("doctor: ok");
        return Ok(());
    }
    for p in &problems {
        println!("problem: {p}");
    }
    Err(anyhow::anyhow!("doctor found {} problem(s)", problems.len()))
}

fn resolve_category(issue: &str, explicit: Option<&str>) -> anyhow::Result<IssueCategory> {
    if let Some(name) = explicit {
        return IssueCategory::from_str(name).map_err(|e| anyhow::anyhow!(e));
    }
    Ok(match classify_request(issue) {
        RequestKind::SelfImprove { category } => category,
        RequestKind::Chat => IssueCategory::Logic,
    })
}

async fn project_context(
    root: &Path,
    name: Option<String>,
    open_file: Option<String>,
) -> ProjectContext {
    let name = name.unwrap_or_else(|| {
        std::fs::canonicalize(root)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "workspace".to_string())
    });
    let mut project = ProjectContext::new(name);
    project.open_file = open_file;

    if let Ok(mut dir) = tokio::fs::read_dir(root).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            project.files.push(file_name);
            if project.files.len() >= PROJECT_FILES_MAX {
                break;
            }
        }
    }
    project.files.sort();
    project
}

fn print_event(event: &OodaEvent) {
    eprintln!("[{}] {}: {}", event.phase, event.kind.as_str(), event.message);
}

/// `None` on EOF.
async fn read_line(prompt: &'static str) -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{prompt}");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await??;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_comes_from_flag_or_classifier() {
        assert_eq!(
            resolve_category("whatever", Some("performance")).unwrap(),
            IssueCategory::Performance
        );
        assert!(resolve_category("whatever", Some("cosmetic")).is_err());
        assert_eq!(
            resolve_category("الزر لا يعمل في الشريط الجانبي", None).unwrap(),
            IssueCategory::UiBug
        );
        assert_eq!(resolve_category("hello", None).unwrap(), IssueCategory::Logic);
    }

    #[tokio::test]
    async fn project_context_lists_visible_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();

        let project =
            project_context(dir.path(), Some("ide".to_string()), Some("a.rs".to_string())).await;
        assert_eq!(project.name, "ide");
        assert_eq!(project.files, vec!["a.rs", "b.rs"]);
        assert_eq!(project.open_file.as_deref(), Some("a.rs"));
    }
}
