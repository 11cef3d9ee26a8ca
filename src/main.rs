use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diffreview::cli::Cli;
use diffreview::config::Config;
use diffreview::host::TerminalHost;
use diffreview::inject::AppleScriptChannel;
use diffreview::llm::OpenAiClient;
use diffreview::orchestrator::Orchestrator;
use diffreview::prompts::PromptEngine;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(?config, "config loaded");

    let host = TerminalHost::new(cli.file.clone(), cli.workspace.clone())
        .with_line(cli.line)
        .with_assume_yes(config.assume_yes);
    let client = OpenAiClient::new(config.credential.as_ref().map(|c| c.expose().to_string()))
        .with_base_url(config.base_url.clone())
        .with_model(config.model.clone())
        .with_temperature(config.temperature)
        .with_timeout(config.request_timeout);
    let channel = AppleScriptChannel::new(
        config.interpreter.clone(),
        config.target_app.clone().unwrap_or_default(),
    )
    .with_timeout(config.automation_timeout);
    let prompt_engine = PromptEngine::new(config.prompt_dir.clone());

    let orchestrator = Orchestrator::new(host, client, channel, prompt_engine, config);

    // The host has already shown the error; the exit code is for scripts.
    if orchestrator.execute().await.is_err() {
        std::process::exit(1);
    }
}
