use crate::modules::invite_tracking::ledger::{JoinEvent, RemoteInvite};
use crate::modules::invite_tracking::tracking;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;

pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move { handle_event(ctx, event, data).await })
}

async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot, .. } => {
            handle_ready(ctx, data_about_bot, data).await?;
        }
        serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
            // Large guilds arrive with a partial member list; the roster needs all of them.
            if (guild.members.len() as u64) < guild.member_count {
                ctx.shard.chunk_guild(
                    guild.id,
                    None,
                    false,
                    serenity::ChunkGuildFilter::None,
                    None,
                );
            }
            if is_new.unwrap_or(false) {
                tracking::sync_guild_invites(&ctx.http, guild.id, data).await?;
            }
        }
        serenity::FullEvent::InviteCreate { data: invite_data, .. } => {
            handle_invite_create(invite_data, data).await?;
        }
        serenity::FullEvent::GuildMemberAddition { new_member, .. } => {
            handle_member_join(ctx, new_member, data).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_ready(
    ctx: &serenity::Context,
    ready: &serenity::Ready,
    data: &Data,
) -> Result<(), Error> {
    tracing::info!("Syncing invites for {} guilds", ready.guilds.len());

    for guild in &ready.guilds {
        if let Err(e) = tracking::sync_guild_invites(&ctx.http, guild.id, data).await {
            tracing::error!("Failed to sync invites for guild {}: {:?}", guild.id, e);
        }
    }

    Ok(())
}

async fn handle_invite_create(
    invite_event: &serenity::InviteCreateEvent,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = invite_event.guild_id else {
        tracing::warn!("Invite created without guild_id");
        return Ok(());
    };

    // Fresh invites start unused.
    let invite = RemoteInvite {
        code: invite_event.code.clone(),
        uses: 0,
        inviter: invite_event.inviter.as_ref().map(|u| u.id.get()),
    };

    if data.ledger.observe_invite(guild_id.get(), &invite).await? {
        tracing::info!("Tracking new invite {} in guild {}", invite.code, guild_id);
    }

    Ok(())
}

async fn handle_member_join(
    ctx: &serenity::Context,
    member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    let guild_id = member.guild_id;

    let current_invites = match tracking::fetch_guild_invites(&ctx.http, guild_id).await {
        Ok(invites) => invites,
        Err(e) => {
            tracing::error!("Failed to fetch invites: {:?}", e);
            return Ok(());
        }
    };

    let matched = data
        .ledger
        .record_join(guild_id.get(), JoinEvent::from(member), &current_invites)
        .await?;

    match matched {
        Some(code) => tracing::info!(
            "Member {} joined guild {} through invite {}",
            member.user.id,
            guild_id,
            code
        ),
        None => tracing::debug!(
            "Could not attribute join of {} in guild {} to a tracked invite",
            member.user.id,
            guild_id
        ),
    }

    Ok(())
}
