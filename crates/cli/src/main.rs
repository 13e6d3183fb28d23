use clap::{Parser, Subcommand};
use relay::channels::InboundMessage;
use relay::pipeline::Pipeline;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "dify-relay")]
#[command(about = "Relay messages from Dify apps to a WeCom group robot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Load and validate the configuration, then print a summary (secrets redacted).
    Check {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.dify-relay/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Relay one message through Dify and deliver the reply to WeCom.
    Send {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.dify-relay/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Message text (empty uses dify.default_prompt).
        #[arg(long, short, default_value = "")]
        message: String,

        /// User id (default: a fresh random id).
        #[arg(long, short, default_value = "")]
        user: String,

        /// Conversation id to continue.
        #[arg(long, value_name = "ID", default_value = "")]
        conversation: String,

        /// Local file to attach (chat apps only).
        #[arg(long, short, value_name = "PATH", default_value = "")]
        file: String,
    },

    /// Relay lines read from stdin for one user. /reset forgets the conversation,
    /// /file <path> [text] attaches a file, /quit exits.
    Chat {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.dify-relay/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// User id (default: a fresh random id).
        #[arg(long, short, default_value = "")]
        user: String,

        /// Existing conversation id to continue.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("dify-relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            config,
            message,
            user,
            conversation,
            file,
        }) => {
            if let Err(e) = run_send(config, &message, &user, &conversation, &file).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            user,
            conversation,
        }) => {
            if let Err(e) = run_chat(config, &user, conversation).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn load_pipeline(config_path: Option<PathBuf>) -> anyhow::Result<Pipeline> {
    let (config, path) = relay::config::load_config(config_path)?;
    config.validate()?;
    log::info!(
        "loaded config from {} (bot type {})",
        path.display(),
        config.dify.bot_type
    );
    Pipeline::from_config(config)
}

/// Caller-supplied user id, or a fresh one when empty.
fn user_or_random(user: &str) -> String {
    let user = user.trim();
    if user.is_empty() {
        let generated = uuid::Uuid::new_v4().to_string();
        log::info!("no user id given, using {}", generated);
        generated
    } else {
        user.to_string()
    }
}

fn redact(secret: &str) -> String {
    match secret.char_indices().nth(4) {
        Some((idx, _)) => format!("{}****", &secret[..idx]),
        None if secret.is_empty() => "(not set)".to_string(),
        None => "****".to_string(),
    }
}

fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    config.validate()?;
    let webhook = match config.wecom.webhook_url.split_once("key=") {
        Some((base, key)) => format!("{}key={}", base, redact(key)),
        None => config.wecom.webhook_url.clone(),
    };
    println!("config:        {}", path.display());
    println!("dify base url: {}", config.dify.base_url);
    println!("dify api key:  {}", redact(&config.dify.api_key));
    println!("bot type:      {}", config.bot_type()?);
    if !config.dify.workflow_id.is_empty() {
        println!("workflow id:   {}", config.dify.workflow_id);
    }
    println!("wecom webhook: {}", webhook);
    Ok(())
}

async fn run_send(
    config_path: Option<PathBuf>,
    message: &str,
    user: &str,
    conversation: &str,
    file: &str,
) -> anyhow::Result<()> {
    let pipeline = load_pipeline(config_path)?;
    let user = user_or_random(user);
    pipeline
        .handle_parts(message, &user, conversation, file)
        .await?;
    if let Some(id) = pipeline.conversations().get(&user).await {
        println!("delivered (user {}, conversation {})", user, id);
    } else {
        println!("delivered (user {})", user);
    }
    Ok(())
}

async fn run_chat(
    config_path: Option<PathBuf>,
    user: &str,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let pipeline = load_pipeline(config_path)?;
    let user = user_or_random(user);
    let mut pending_conversation = conversation.filter(|c| !c.trim().is_empty());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/quit") || input.eq_ignore_ascii_case("/exit") {
            break;
        }
        if input.eq_ignore_ascii_case("/reset") {
            pipeline.conversations().delete(&user).await;
            pending_conversation = None;
            println!("conversation reset");
            continue;
        }

        let mut message = match input.strip_prefix("/file ") {
            Some(rest) => {
                let rest = rest.trim();
                let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                InboundMessage::new(text.trim(), user.as_str()).with_attachment(path)
            }
            None => InboundMessage::new(input, user.as_str()),
        };
        if let Some(id) = pending_conversation.take() {
            message = message.with_conversation(id);
        }

        match pipeline.handle(message).await {
            Ok(()) => match pipeline.conversations().get(&user).await {
                Some(id) => println!("< delivered (conversation {})", id),
                None => println!("< delivered"),
            },
            Err(e) => eprintln!("relay error: {}", e),
        }
    }

    Ok(())
}
