//! `contextloop agent`: interactive or single-message chat mode.

use contextloop_agent::{AgentLoop, AgentSettings, LoopOutcome};
use contextloop_config::AppConfig;
use contextloop_core::message::Conversation;
use contextloop_providers::ClientRouter;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

pub async fn run(
    message: Option<String>,
    resume: Option<PathBuf>,
    save: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let settings = {
        let root = &config.workspace.root;
        if !root.starts_with("~") && !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        AgentSettings::from_config(&config)?
    };

    if !config.has_api_key() && settings.profile.provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONTEXTLOOP_API_KEY, OPENAI_API_KEY, OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = ClientRouter::from_config(&config);
    let client = router.client_for(&settings.profile)?;
    let tools = Arc::new(contextloop_tools::default_registry()?);

    let model = settings.profile.model_id.clone();
    let workspace = settings.workspace.root().display().to_string();
    let tool_count = tools.len();

    let mut agent = AgentLoop::new(client, tools, settings);
    if let Some(path) = &resume {
        let conversation = Conversation::load_json(path)
            .map_err(|e| format!("Failed to resume from {}: {e}", path.display()))?;
        info!(
            messages = conversation.len(),
            path = %path.display(),
            "Resumed conversation"
        );
        agent = agent.with_conversation(conversation);
    }

    let result = if let Some(msg) = message {
        single_shot(&mut agent, msg).await
    } else {
        println!();
        println!("  contextloop agent (interactive)");
        println!();
        println!("  Model:      {model}");
        println!("  Workspace:  {workspace}");
        println!("  Tools:      {tool_count}");
        println!("  {}", agent.budget());
        println!();
        println!("  Type your message and press Enter.");
        println!("  Ctrl+C interrupts a running turn; type 'exit' to quit.");
        println!();
        interactive(&mut agent).await
    };

    if let Some(path) = &save {
        agent.conversation().save_json(path)?;
        info!(
            messages = agent.conversation().len(),
            path = %path.display(),
            "Saved conversation"
        );
    }

    result
}

async fn single_shot(agent: &mut AgentLoop, message: String) -> Result<(), Box<dyn std::error::Error>> {
    eprint!("  Thinking...");
    let outcome = turn(agent, message).await;
    eprint!("\r              \r");

    match outcome? {
        LoopOutcome::Answered { text, .. } => {
            println!("{text}");
            eprintln!("  [{}]", agent.budget());
        }
        LoopOutcome::Cancelled { .. } => eprintln!("  [cancelled]"),
    }
    Ok(())
}

async fn interactive(agent: &mut AgentLoop) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        eprint!("  ...");
        let outcome = turn(agent, line.to_string()).await;
        eprint!("\r     \r");

        match outcome {
            Ok(LoopOutcome::Answered { text, .. }) => {
                println!();
                for line in text.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
                println!("  [{}]", agent.budget());
                println!();
            }
            Ok(LoopOutcome::Cancelled { during }) => {
                eprintln!("  [cancelled during {during}]");
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one turn with Ctrl-C wired to the loop's cancel token.
async fn turn(
    agent: &mut AgentLoop,
    message: String,
) -> Result<LoopOutcome, contextloop_agent::LoopFailure> {
    let token = agent.reset_cancellation();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling the running turn");
            token.cancel();
        }
    });

    let outcome = agent.submit(message).await;
    watcher.abort();
    outcome
}
