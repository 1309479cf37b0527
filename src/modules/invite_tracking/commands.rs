use crate::modules::invite_tracking::ledger::{JoinEvent, RemoteInvite};
use crate::modules::invite_tracking::stats::{self, InviteStats};
use crate::modules::invite_tracking::tracking;
use crate::services::localization::{ContextL10nExt, L10nProxy};
use crate::{Context, Error};
use fluent::FluentArgs;
use poise::serenity_prelude as serenity;

const COLOR_SUCCESS: u32 = 0x2ecc71;
const COLOR_INFO: u32 = 0x3498db;
const COLOR_ERROR: u32 = 0xe74c3c;

/// Active links shown per embed before the list is cut off.
const ACTIVE_LINKS_SHOWN: usize = 5;

/// Create a tracked invite link for a user
#[poise::command(
    slash_command,
    guild_only,
    rename = "createinvite",
    default_member_permissions = "CREATE_INSTANT_INVITE | MANAGE_GUILD"
)]
pub async fn create_invite(
    ctx: Context<'_>,
    #[description = "User the invite is tracked for"] user: serenity::User,
    #[description = "Channel to create the invite in (defaults to this one)"]
    #[channel_types("Text", "News")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let l10n = ctx.l10n_user();
    let channel_id = channel.as_ref().map_or(ctx.channel_id(), |c| c.id);

    let reason = format!("Tracked invite for {}", user.name);
    let builder = serenity::CreateInvite::new()
        .max_age(0)
        .max_uses(0)
        .audit_log_reason(&reason);

    let invite = match channel_id.create_invite(ctx.serenity_context(), builder).await {
        Ok(invite) => invite,
        Err(e) => {
            let key = if tracking::is_missing_permissions(&e) {
                "createinvite-missing-permissions"
            } else {
                tracing::error!("Failed to create invite in channel {}: {:?}", channel_id, e);
                "createinvite-failed"
            };
            let embed = serenity::CreateEmbed::new()
                .title(l10n.t("error-title", None))
                .description(l10n.t(key, None))
                .colour(COLOR_ERROR);
            ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
                .await?;
            return Ok(());
        }
    };

    ctx.data()
        .ledger
        .track_invite(guild_id.get(), &invite.code, user.id.get())
        .await?;
    tracing::info!(
        "Created tracked invite {} for user {} in guild {}",
        invite.code,
        user.id,
        guild_id
    );

    let embed = serenity::CreateEmbed::new()
        .title(l10n.t("createinvite-title", None))
        .colour(COLOR_SUCCESS)
        .field(l10n.t("createinvite-created-for", None), mention_user(user.id.get()), true)
        .field(l10n.t("createinvite-channel", None), format!("<#{}>", channel_id), true)
        .field(l10n.t("createinvite-link", None), invite.url(), false)
        .footer(footer(&ctx, &l10n, "createinvite-footer"));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Show invite statistics for a user
#[poise::command(slash_command, guild_only, default_member_permissions = "MANAGE_GUILD")]
pub async fn invites(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let member = user.as_ref().unwrap_or_else(|| ctx.author());
    let l10n = ctx.l10n_user();

    ctx.defer().await?;

    let remote = fetch_remote(&ctx, guild_id).await;
    let (guild, user_id) = (guild_id.get(), member.id.get());
    let stats = ctx
        .data()
        .ledger
        .read(|ledger| stats::invite_stats_for(ledger, guild, user_id, remote.as_deref()))
        .await;

    let mut embed = serenity::CreateEmbed::new()
        .title(l10n.t("invites-title", None))
        .colour(COLOR_INFO)
        .field(l10n.t("invites-member", None), mention_user(user_id), true)
        .field(l10n.t("invites-total", None), stats.total_uses.to_string(), true)
        .thumbnail(member.face())
        .footer(footer(&ctx, &l10n, "invites-footer"));
    embed = add_link_fields(embed, &stats, &l10n);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Show detailed invite statistics including invited users
#[poise::command(
    slash_command,
    guild_only,
    rename = "detailed-invites",
    default_member_permissions = "MANAGE_GUILD"
)]
pub async fn detailed_invites(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
    #[description = "List every invited member instead of the 10 most recent"]
    show_all: Option<bool>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let member = user.as_ref().unwrap_or_else(|| ctx.author());
    let show_all = show_all.unwrap_or(false);
    let l10n = ctx.l10n_user();

    ctx.defer().await?;

    let remote = fetch_remote(&ctx, guild_id).await;
    let (guild, user_id) = (guild_id.get(), member.id.get());
    let detailed = ctx
        .data()
        .ledger
        .read(|ledger| {
            stats::detailed_invite_stats_for(ledger, guild, user_id, remote.as_deref(), show_all)
        })
        .await;

    let mut embed = serenity::CreateEmbed::new()
        .title(l10n.t("detailed-invites-title", None))
        .colour(COLOR_INFO)
        .field(l10n.t("detailed-invites-inviter", None), mention_user(user_id), true)
        .field(
            l10n.t("invites-total", None),
            detailed.stats.total_uses.to_string(),
            true,
        )
        .thumbnail(member.face())
        .footer(footer(&ctx, &l10n, "invites-footer"));
    embed = add_link_fields(embed, &detailed.stats, &l10n);

    let roster: Vec<String> = detailed
        .invited_users
        .iter()
        .filter(|joined| is_still_member(&ctx, guild_id, joined.id))
        .map(|joined| roster_line(joined, &l10n))
        .collect();

    if !roster.is_empty() {
        let mut value = roster.join("\n");
        if detailed.is_truncated() {
            value.push_str("\n...");
        }
        let mut args = FluentArgs::new();
        args.set("total", detailed.invited_total.to_string());
        embed = embed.field(l10n.t("detailed-invites-roster", Some(&args)), value, false);
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

pub fn commands() -> Vec<poise::Command<crate::Data, Error>> {
    vec![create_invite(), invites(), detailed_invites()]
}

// Helper functions

fn guild_id(ctx: &Context<'_>) -> Result<serenity::GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| anyhow::anyhow!("guild-only command invoked outside a guild"))
}

/// Live invites of the guild, or `None` if Discord couldn't be reached. Callers treat
/// `None` as "validity unknown" rather than failing the whole command.
async fn fetch_remote(
    ctx: &Context<'_>,
    guild_id: serenity::GuildId,
) -> Option<Vec<RemoteInvite>> {
    match tracking::fetch_guild_invites(ctx.http(), guild_id).await {
        Ok(invites) => Some(invites),
        Err(e) => {
            tracing::warn!("Failed to fetch invites for guild {}: {:?}", guild_id, e);
            None
        }
    }
}

fn add_link_fields(
    mut embed: serenity::CreateEmbed,
    stats: &InviteStats,
    l10n: &L10nProxy,
) -> serenity::CreateEmbed {
    let active: Vec<String> = stats
        .active_links()
        .map(|link| {
            let mut args = FluentArgs::new();
            args.set("code", link.code.as_str());
            args.set("uses", link.uses.to_string());
            l10n.t("invites-active-link", Some(&args))
        })
        .collect();

    if !active.is_empty() {
        embed = embed.field(
            l10n.t("invites-active-links", None),
            truncate_lines(&active, ACTIVE_LINKS_SHOWN),
            false,
        );
    }

    let unconfirmed = stats.unconfirmed().count();
    if unconfirmed > 0 {
        let mut args = FluentArgs::new();
        args.set("count", unconfirmed.to_string());
        embed = embed.field(
            l10n.t("invites-unconfirmed-title", None),
            l10n.t("invites-unconfirmed", Some(&args)),
            false,
        );
    }

    embed
}

fn roster_line(joined: &JoinEvent, l10n: &L10nProxy) -> String {
    let mut args = FluentArgs::new();
    args.set("user", mention_user(joined.id));
    match joined.joined_at {
        Some(at) => {
            let joined = serenity::FormattedTimestamp::new(
                at.into(),
                Some(serenity::FormattedTimestampStyle::RelativeTime),
            );
            args.set("joined", joined.to_string());
            l10n.t("detailed-invites-user-line", Some(&args))
        }
        None => l10n.t("detailed-invites-user-line-undated", Some(&args)),
    }
}

/// Whether an invited user still belongs in the roster, judged from the cache.
fn is_still_member(ctx: &Context<'_>, guild_id: serenity::GuildId, user_id: u64) -> bool {
    ctx.cache().guild(guild_id).map_or(true, |guild| {
        keep_in_roster(
            guild.members.contains_key(&serenity::UserId::new(user_id)),
            guild.members.len() as u64 >= guild.member_count,
        )
    })
}

/// A member missing from a partially loaded member cache may still be in the guild, so
/// only a complete cache can rule someone out.
fn keep_in_roster(cached: bool, cache_complete: bool) -> bool {
    cached || !cache_complete
}

fn footer(ctx: &Context<'_>, l10n: &L10nProxy, key: &str) -> serenity::CreateEmbedFooter {
    let mut args = FluentArgs::new();
    args.set("name", ctx.author().name.as_str());
    let footer = serenity::CreateEmbedFooter::new(l10n.t(key, Some(&args)));
    match ctx.author().avatar_url() {
        Some(url) => footer.icon_url(url),
        None => footer,
    }
}

fn mention_user(user_id: u64) -> String {
    serenity::Mention::from(serenity::UserId::new(user_id)).to_string()
}

fn truncate_lines(lines: &[String], limit: usize) -> String {
    let mut out = lines[..lines.len().min(limit)].join("\n");
    if lines.len() > limit {
        out.push_str("\n...");
    }
    out
}
