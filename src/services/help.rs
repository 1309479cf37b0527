use crate::services::localization::ContextL10nExt;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;

/// List every module and the commands it provides
#[poise::command(slash_command, guild_only)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let l10n = ctx.l10n_user();
    let commands = &ctx.framework().options().commands;

    let mut embed = serenity::CreateEmbed::new()
        .title(l10n.t("help-title", None))
        .colour(0x95a5a6);

    for module in &ctx.data().module_definitions {
        let lines: Vec<String> = commands
            .iter()
            .filter(|cmd| cmd.category.as_deref() == Some(module.id))
            .map(|cmd| {
                format!(
                    "`/{}` {}",
                    cmd.name,
                    cmd.description.as_deref().unwrap_or_default()
                )
            })
            .collect();

        if lines.is_empty() {
            continue;
        }

        let title = format!(
            "{}: {}",
            l10n.t(module.name_key, None),
            l10n.t(module.description_key, None)
        );
        embed = embed.field(title, lines.join("\n"), false);
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}
