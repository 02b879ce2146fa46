// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, OutputFormatArg};
use sven_config::{AgentConfig, AgentMode, Config};
use sven_core::{Agent, AgentRuntimeContext};
use sven_model::catalog::ModelCatalogEntry;
use sven_subagent::{
    AgentCapabilities, AgentProvider, CoordinatorContext, InMemorySessionStore,
    ReasoningActingAgent, SubAgent, SubAgentTool,
};
use sven_tools::{
    events::ToolEvent,
    policy::ApprovalPolicy,
    AskQuestionTool, DeleteFileTool, EditFileTool, FindFileTool, GrepTool, ListDirTool,
    ReadFileTool, ReadLintsTool, RunTerminalCommandTool, SearchCodebaseTool, SwitchModeTool,
    Tool, TodoWriteTool, ToolCall, ToolRegistry, UpdateMemoryTool, WebFetchTool, WebSearchTool,
    WriteTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(*shell);
            return Ok(());
        }
        Some(Commands::ShowConfig) => {
            let config = sven_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            return Ok(());
        }
        Some(Commands::ListModels { provider, json }) => {
            return list_models_cmd(provider.as_deref(), *json);
        }
        Some(Commands::ListProviders { verbose, json }) => {
            return list_providers_cmd(*verbose, *json);
        }
        Some(Commands::Task { message, session, approvals, output_format }) => {
            let config = Arc::new(sven_config::load(cli.config.as_deref())?);
            return run_task(config, message, session.as_deref(), approvals, *output_format).await;
        }
        None => {
            anyhow::bail!("no subcommand given — run `sven --help` for usage");
        }
    }
}

/// Builds fresh, independent [`SubAgent`] instances sharing one model
/// provider and agent configuration — the coordinator-side counterpart to
/// how the top-level agent used to hand a depth-limited tool registry to
/// each sub-task it spawned.
struct CliAgentProvider {
    model: Arc<dyn sven_model::ModelProvider>,
    agent_config: Arc<AgentConfig>,
    config: Arc<Config>,
}

impl CliAgentProvider {
    fn build_registry(&self) -> ToolRegistry {
        let mode: Arc<Mutex<AgentMode>> = Arc::new(Mutex::new(AgentMode::Agent));
        let (tx, _rx) = mpsc::channel::<ToolEvent>(64);

        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(ListDirTool);
        reg.register(FindFileTool);
        reg.register(GrepTool);
        reg.register(SearchCodebaseTool);
        reg.register(ReadLintsTool);
        reg.register(AskQuestionTool::new());
        reg.register(WebFetchTool);
        reg.register(WebSearchTool { api_key: self.config.tools.web.search.api_key.clone() });
        reg.register(UpdateMemoryTool { memory_file: self.config.tools.memory.memory_file.clone() });
        reg.register(TodoWriteTool::new(Arc::new(Mutex::new(Vec::new())), tx.clone()));
        reg.register(SwitchModeTool::new(mode, tx));
        reg.register(WriteTool);
        reg.register(EditFileTool);
        reg.register(DeleteFileTool);
        reg.register(RunTerminalCommandTool { timeout_secs: self.config.tools.timeout_secs });
        reg
    }
}

impl AgentProvider for CliAgentProvider {
    fn new_agent(&self, session_id: &str) -> Box<dyn SubAgent> {
        let tools = Arc::new(self.build_registry());
        let mode_lock = Arc::new(Mutex::new(self.agent_config.default_mode));
        let (_tx, rx) = mpsc::channel::<ToolEvent>(64);
        let policy_tools = tools.clone();
        let hitl_enabled = self.config.subagent.enable_hitl;
        let agent = Agent::new(
            self.model.clone(),
            tools,
            self.agent_config.clone(),
            AgentRuntimeContext::default(),
            mode_lock,
            rx,
            self.model.catalog_context_window().unwrap_or(128_000) as usize,
        );
        // Suspend exactly the inner calls whose own tool policy resolves to
        // `Ask` — the same signal `RunTerminalCommandTool` and friends use to
        // decide whether a human should see them before they run.
        let should_suspend: Arc<dyn Fn(&ToolCall) -> bool + Send + Sync> = Arc::new(move |call: &ToolCall| {
            hitl_enabled
                && policy_tools
                    .get(&call.name)
                    .map(|t| t.default_policy() == ApprovalPolicy::Ask)
                    .unwrap_or(false)
        });
        Box::new(ReasoningActingAgent::new(agent, session_id, should_suspend))
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities { can_suspend: true, participates_in_state: true }
    }

    fn agent_name(&self) -> Option<&str> {
        Some("agent")
    }
}

/// Drive one `SubAgentTool` invocation headlessly: build the tool, submit
/// `message` (or a resume carrying `approvals`), and print the final text.
async fn run_task(
    config: Arc<Config>,
    message: &str,
    session: Option<&str>,
    approvals: &[String],
    output_format: OutputFormatArg,
) -> anyhow::Result<()> {
    let model = Arc::<dyn sven_model::ModelProvider>::from(sven_model::from_config(&config.model)?);
    let agent_config = Arc::new(config.agent.clone());
    let provider = Box::new(CliAgentProvider { model, agent_config, config: config.clone() });

    let mut subagent_config = config.subagent.clone();
    subagent_config.forward_events = false;

    // The CLI drives the sub-agent directly with no addressable outer
    // parent, so there is nothing to detect a HITL capability flag from.
    let tool = SubAgentTool::new(provider, subagent_config, Box::new(InMemorySessionStore::new()))?
        .with_parent_hitl_capability(None);

    let mut args = serde_json::json!({ "message": message });
    if let Some(session_id) = session {
        args["session_id"] = serde_json::json!(session_id);
    }

    let call = if approvals.is_empty() {
        ToolCall { id: "cli-call".to_string(), name: tool.name().to_string(), args, metadata: Default::default() }
    } else {
        let staged = parse_approvals(approvals)?;
        let mut metadata = serde_json::Map::new();
        metadata.insert("previous_tool_result".to_string(), serde_json::to_value(staged)?);
        ToolCall { id: "cli-call".to_string(), name: tool.name().to_string(), args, metadata }
    };

    let result = sven_tools::Tool::execute(&tool, &call).await;

    match output_format {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormatArg::Text => {
            println!("{}", result.content);
            if let Some(session_id) = CoordinatorContext::extract_session_id(&result) {
                if CoordinatorContext::termination_reason(&result).is_suspending() {
                    eprintln!("\n(suspended — resume with: sven task --session {session_id} ...)");
                }
            }
        }
    }

    if result.is_error {
        anyhow::bail!("{}", result.content);
    }
    Ok(())
}

/// Parses repeated `--approve CALL_ID=TEXT` flags into resume-payload
/// `ToolOutput`s, the shape `SubAgentTool::execute` expects under
/// `metadata["previous_tool_result"]`.
fn parse_approvals(approvals: &[String]) -> anyhow::Result<Vec<sven_tools::ToolOutput>> {
    approvals
        .iter()
        .map(|entry| {
            let (call_id, text) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("--approve must be CALL_ID=TEXT, got {entry:?}"))?;
            Ok(sven_tools::ToolOutput::ok(call_id, text))
        })
        .collect()
}

fn list_models_cmd(provider_filter: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if sven_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `sven list-providers` for details):");
            for d in sven_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let mut entries: Vec<ModelCatalogEntry> = sven_model::catalog::static_catalog();
    if let Some(prov) = provider_filter {
        entries.retain(|e| e.provider == prov);
    }
    entries.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries.iter().map(|e| e.provider.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID", "PROVIDER", "CTX WINDOW", "MAX OUT TOKENS",
        id_w = id_w, prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 { "  -".to_string() } else { format!("{:>12}", e.context_window) };
        let max_out = if e.max_output_tokens == 0 { "  -".to_string() } else { format!("{:>16}", e.max_output_tokens) };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id, e.provider, ctx, max_out, e.description,
            id_w = id_w, prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = sven_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers.iter().map(|d| d.name.len()).max().unwrap_or(8).max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `sven list-providers --verbose` for API key and URL details.");
        println!("Use `sven list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
