use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use tracing::{error, info};

/// Framework-level handler for non-command Discord events.
///
/// Logs lifecycle events, then hands every event to each module's handlers in turn.
/// A failing module handler is logged and never stops the others.
pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    _framework: poise::FrameworkContext<'a, Data, Error>,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        match event {
            serenity::FullEvent::Ready { data_about_bot, .. } => {
                info!("Logged in as {}", data_about_bot.user.name);
            }
            serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
                if is_new.unwrap_or(false) {
                    info!("Joined new guild: {} ({})", guild.name, guild.id);
                }
            }
            serenity::FullEvent::GuildDelete { incomplete, .. } => {
                info!("Left guild: {}", incomplete.id);
            }
            _ => {}
        }

        for (module_id, handler) in &data.event_handlers {
            if let Err(e) = handler(ctx, event, data).await {
                error!("Error in event handler for module {}: {:?}", module_id, e);
            }
        }

        Ok(())
    })
}
