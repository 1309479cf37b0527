use anyhow::Context as _;
use clap::Parser as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod modules;
mod services;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Publish commands. If no guild ID is provided, publish globally.
    #[arg(long, num_args = 0..)]
    publish: Option<Vec<u64>>,

    /// Clear all commands instead of publishing them.
    #[arg(long)]
    clear: bool,

    /// Path of the JSON file holding the invite ledger.
    #[arg(long, env = "INVITES_FILE", default_value = "invites.json")]
    invites_file: PathBuf,
}

// Custom user data passed to all command functions
pub struct Data {
    pub ledger: Arc<services::ledger_store::LedgerStore>,
    pub l10n: Arc<services::localization::LocalizationManager>,
    pub module_definitions: Vec<modules::ModuleDefinition>,
    pub event_handlers: Vec<(&'static str, modules::EventHandler)>,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse CLI arguments (after .env so INVITES_FILE can come from it)
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting invite ledger bot...");

    let token = std::env::var("DISCORD_TOKEN").context("missing DISCORD_TOKEN")?;
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_INVITES
        | serenity::GatewayIntents::GUILD_MEMBERS;

    // Initialize localization manager
    let l10n = Arc::new(services::localization::LocalizationManager::new());

    // Load and translate commands
    let mut commands = modules::commands();
    l10n.apply_translations(&mut commands);

    let framework_options = poise::FrameworkOptions {
        commands,
        event_handler: services::event_manager::handler,
        ..Default::default()
    };

    // Handle command registration if requested
    if let Some(publish_args) = args.publish {
        let http = serenity::Http::new(&token);
        let application = http
            .get_current_application_info()
            .await
            .context("Failed to fetch application info")?;
        http.set_application_id(application.id);

        info!("Fetched Application ID: {}", application.id);

        let empty_commands = vec![];
        let commands = if args.clear {
            &empty_commands
        } else {
            &framework_options.commands
        };

        if publish_args.is_empty() {
            if args.clear {
                info!("Clearing commands globally...");
            } else {
                info!("Registering commands globally...");
            }

            if let Err(e) = poise::builtins::register_globally(&http, commands).await {
                error!("Failed to register commands globally: {}", e);
            } else {
                info!("Global command operation successful");
            }
        } else {
            for guild_id in publish_args {
                if args.clear {
                    info!("Clearing commands in guild {}...", guild_id);
                } else {
                    info!("Registering commands in guild {}...", guild_id);
                }

                if let Err(e) = poise::builtins::register_in_guild(
                    &http,
                    commands,
                    serenity::GuildId::new(guild_id),
                )
                .await
                {
                    error!("Failed to register commands in guild {}: {}", guild_id, e);
                } else {
                    info!("Guild command operation successful for guild {}", guild_id);
                }
            }
        }
        return Ok(());
    }

    // Load the invite ledger
    let ledger = services::ledger_store::LedgerStore::open(&args.invites_file)
        .await
        .with_context(|| format!("Failed to load ledger {}", args.invites_file.display()))?;
    info!("Loaded invite ledger from {}", ledger.path().display());

    let data = Data {
        ledger: Arc::new(ledger),
        l10n,
        module_definitions: modules::definitions(),
        event_handlers: modules::event_handlers(),
    };

    // Create the poise framework
    let framework = poise::Framework::builder()
        .options(framework_options)
        .setup(move |_ctx, _ready, _framework| Box::pin(async move { Ok(data) }))
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("Failed to create client")?;

    info!("Bot is ready!");
    client.start_autosharded().await.context("Client error")?;

    Ok(())
}
