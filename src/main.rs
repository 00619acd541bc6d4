mod api;
mod gateway;

use clap::{Parser, Subcommand};
use concierge_channels::{bridge::BridgeChannel, whisper::WhisperTranscriber};
use concierge_core::{
    config::{self, shellexpand, Config},
    phone::ConversationKey,
    schedule::{parse_due_at, MessageStatus},
    traits::{
        BlockList, ConfigSource, KeywordRule, KeywordRuleSource, Provider, Responder, Transcriber,
    },
};
use concierge_memory::Store;
use concierge_providers::{OpenAiProvider, ResponderChain};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "concierge",
    version,
    about = "Concierge - conversation orchestration for a messaging assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", env = "CONCIERGE_CONFIG")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway, dispatcher, and API.
    Start {
        /// Overrides `[api].api_key`.
        #[arg(long, env = "CONCIERGE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Overrides `[provider].api_key`.
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_key: Option<String>,
    },
    /// Show configuration and store counters.
    Status,
    /// Queue a message for scheduled delivery.
    Enqueue {
        /// Recipient phone, any common format.
        #[arg(long)]
        to: String,
        /// Local due time, e.g. "05/03/2024 09:30" or "2024-03-05 09:30".
        #[arg(long)]
        due: String,
        /// Media URL delivered with the message.
        #[arg(long)]
        media: Option<String>,
        /// Message text.
        #[arg(trailing_var_arg = true, required = true)]
        body: Vec<String>,
    },
    /// List the scheduled backlog.
    Backlog,
    /// Never answer this sender again.
    Block {
        phone: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Remove a sender from the block list.
    Unblock { phone: String },
    /// Show or replace the survey questions.
    Questions {
        /// New questions, in order. Omit to print the current list.
        questions: Vec<String>,
    },
    /// Show or replace the keyword reply rules.
    Rules {
        /// `keyword=reply` pairs in priority order. Omit to print the table.
        rules: Vec<String>,
    },
    /// Override a handoff/survey setting at runtime.
    Set {
        /// `handoff` or `survey`.
        section: String,
        key: String,
        value: String,
    },
    /// Print completed survey results as tab-separated rows.
    Surveys,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(&cli.config)?;
    let _log_guard = init_tracing(&cfg)?;

    match cli.command {
        Commands::Start {
            api_key,
            openai_key,
        } => {
            if let Some(key) = api_key {
                cfg.api.api_key = key;
            }
            if let Some(key) = openai_key {
                cfg.provider.api_key = key;
            }
            start(cfg).await?;
        }
        Commands::Status => status(&cli.config, &cfg).await?,
        Commands::Enqueue {
            to,
            due,
            media,
            body,
        } => {
            if parse_due_at(&due).is_none() {
                anyhow::bail!(
                    "unrecognized due time '{due}'. Use DD/MM/YYYY HH:MM or YYYY-MM-DD HH:MM"
                );
            }
            let key = phone_key(&cfg, &to)?;
            let store = Store::new(&cfg.memory).await?;
            let id = store
                .enqueue(key.as_str(), &body.join(" "), media.as_deref(), &due)
                .await?;
            println!("queued {id} for {key} at {due}");
        }
        Commands::Backlog => {
            let store = Store::new(&cfg.memory).await?;
            for msg in store.list_backlog().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    msg.id, msg.status, msg.due_at, msg.recipient, msg.body
                );
            }
        }
        Commands::Block { phone, reason } => {
            let key = phone_key(&cfg, &phone)?;
            let store = Store::new(&cfg.memory).await?;
            store.add(&key, &reason).await?;
            println!("blocked {key}");
        }
        Commands::Unblock { phone } => {
            let key = phone_key(&cfg, &phone)?;
            let store = Store::new(&cfg.memory).await?;
            if store.remove(&key).await? {
                println!("unblocked {key}");
            } else {
                println!("{key} was not blocked");
            }
        }
        Commands::Questions { questions } => {
            let store = Store::new(&cfg.memory).await?;
            if !questions.is_empty() {
                store.replace_survey_questions(&questions).await?;
            }
            for (i, q) in store.survey_questions().await?.iter().enumerate() {
                println!("{}. {q}", i + 1);
            }
        }
        Commands::Rules { rules } => {
            let store = Store::new(&cfg.memory).await?;
            if !rules.is_empty() {
                let parsed = rules
                    .iter()
                    .map(|r| parse_rule(r))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                store.replace_keyword_rules(&parsed).await?;
            }
            for rule in store.keyword_rules().await? {
                println!("{}\t{}", rule.keyword, rule.reply);
            }
        }
        Commands::Set {
            section,
            key,
            value,
        } => {
            if section != "handoff" && section != "survey" {
                anyhow::bail!("unknown section '{section}', expected 'handoff' or 'survey'");
            }
            let store = Store::new(&cfg.memory).await?;
            store.set_setting(&section, &key, &value).await?;
            println!("{section}.{key} = {value}");
        }
        Commands::Surveys => {
            let store = Store::new(&cfg.memory).await?;
            for record in store.survey_records().await? {
                println!("{}\t{}", record.completed_at, record.to_row().join("\t"));
            }
        }
    }

    Ok(())
}

async fn start(cfg: Config) -> anyhow::Result<()> {
    let bridge_cfg = match cfg.channel.bridge {
        Some(ref b) if b.enabled => b.clone(),
        _ => anyhow::bail!("No channel enabled. Enable [channel.bridge] in config.toml."),
    };

    let store = Store::new(&cfg.memory).await?;
    let bridge = Arc::new(BridgeChannel::new(bridge_cfg));

    let provider: Option<Arc<dyn Provider>> = if cfg.provider.enabled {
        if cfg.provider.api_key.is_empty() {
            anyhow::bail!(
                "Provider is enabled but api_key is empty. \
                 Set it in config.toml or the OPENAI_API_KEY env var."
            );
        }
        Some(Arc::new(OpenAiProvider::from_config(
            cfg.provider.base_url.clone(),
            cfg.provider.api_key.clone(),
            cfg.provider.model.clone(),
        )))
    } else {
        None
    };
    let responder: Arc<dyn Responder> = Arc::new(ResponderChain::new(
        Arc::new(store.clone()),
        provider,
        cfg.provider.system_prompt.clone(),
        cfg.provider.fallback_reply.clone(),
    ));
    let transcriber = WhisperTranscriber::from_config(&cfg.whisper)
        .map(|t| Arc::new(t) as Arc<dyn Transcriber>);

    let store = Arc::new(store);
    let deps = gateway::GatewayDeps {
        channel: bridge.clone(),
        bridge: Some(bridge),
        block_list: store.clone(),
        config_source: store.clone(),
        backlog: store.clone(),
        survey_results: store,
        responder,
        transcriber,
    };

    println!("Concierge - starting {}...", cfg.concierge.name);
    let gw = Arc::new(gateway::Gateway::new(&cfg, deps));
    gw.run().await
}

async fn status(path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("Concierge - Status Check\n");
    println!("Config: {path}");
    match cfg.channel.bridge {
        Some(ref b) if b.enabled => println!("  bridge: {}", b.url),
        Some(_) => println!("  bridge: disabled"),
        None => println!("  bridge: not configured"),
    }
    println!(
        "  voice: {}",
        if cfg.whisper.api_key.is_some() { "whisper" } else { "off" }
    );
    println!(
        "  provider: {}",
        if cfg.provider.enabled {
            cfg.provider.model.as_str()
        } else {
            "fixed replies only"
        }
    );
    println!(
        "  dispatch: {} ({:02}:00-{:02}:00, {}/day)",
        if cfg.dispatch.enabled { "on" } else { "off" },
        cfg.dispatch.active_start_hour,
        cfg.dispatch.active_end_hour,
        cfg.dispatch.max_daily_messages
    );
    println!(
        "  api: {}",
        if cfg.api.enabled {
            format!("{}:{}", cfg.api.host, cfg.api.port)
        } else {
            "off".to_string()
        }
    );
    println!();

    let store = Store::new(&cfg.memory).await?;
    let backlog = store.list_backlog().await?;
    let count = |s: MessageStatus| backlog.iter().filter(|m| m.status == s).count();
    println!(
        "  backlog: {} pending, {} sent, {} failed",
        count(MessageStatus::Pending),
        count(MessageStatus::Sent),
        count(MessageStatus::Failed)
    );
    println!("  blocked senders: {}", store.list_blocked().await?.len());
    println!("  survey questions: {}", store.survey_questions().await?.len());
    println!("  completed surveys: {}", store.survey_records().await?.len());
    Ok(())
}

fn phone_key(cfg: &Config, raw: &str) -> anyhow::Result<ConversationKey> {
    let key = ConversationKey::normalize(
        raw,
        &cfg.phone.default_country_code,
        cfg.phone.local_length,
    );
    if key.is_empty() {
        anyhow::bail!("'{raw}' does not contain a phone number");
    }
    Ok(key)
}

fn parse_rule(raw: &str) -> anyhow::Result<KeywordRule> {
    match raw.split_once('=') {
        Some((keyword, reply)) if !keyword.trim().is_empty() && !reply.trim().is_empty() => {
            Ok(KeywordRule {
                keyword: keyword.trim().to_string(),
                reply: reply.trim().to_string(),
            })
        }
        _ => anyhow::bail!("rule '{raw}' must look like keyword=reply"),
    }
}

/// Log to stderr and to a daily file under `{data_dir}/logs`.
fn init_tracing(cfg: &Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = PathBuf::from(shellexpand(&cfg.concierge.data_dir)).join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "concierge.log"));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.concierge.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}
