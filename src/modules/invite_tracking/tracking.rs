use super::ledger::{JoinEvent, RemoteInvite};
use crate::{Data, Error};
use poise::serenity_prelude as serenity;

impl From<&serenity::RichInvite> for RemoteInvite {
    fn from(invite: &serenity::RichInvite) -> Self {
        Self {
            code: invite.code.clone(),
            uses: invite.uses,
            inviter: invite.inviter.as_ref().map(|u| u.id.get()),
        }
    }
}

impl From<&serenity::Member> for JoinEvent {
    fn from(member: &serenity::Member) -> Self {
        Self {
            id: member.user.id.get(),
            name: member.user.name.clone(),
            joined_at: member.joined_at.map(|ts| *ts),
        }
    }
}

/// Fetch all current invites from Discord API
pub async fn fetch_guild_invites(
    http: &serenity::Http,
    guild_id: serenity::GuildId,
) -> Result<Vec<RemoteInvite>, Error> {
    let invites = guild_id.invites(http).await?;
    Ok(invites.iter().map(RemoteInvite::from).collect())
}

/// Reconcile the stored invites of a guild with Discord (used on startup and when
/// the bot joins a guild).
///
/// If the invite list can't be fetched the guild is left untouched; syncing against
/// an empty list would prune every invite nobody joined through yet.
pub async fn sync_guild_invites(
    http: &serenity::Http,
    guild_id: serenity::GuildId,
    data: &Data,
) -> Result<(), Error> {
    let invites = match fetch_guild_invites(http, guild_id).await {
        Ok(invites) => invites,
        Err(e) => {
            tracing::error!("Failed to fetch invites for guild {}: {:?}", guild_id, e);
            return Ok(());
        }
    };

    let summary = data.ledger.sync_guild(guild_id.get(), &invites).await?;
    if summary.is_noop() {
        tracing::debug!("Invites for guild {} already up to date", guild_id);
        return Ok(());
    }
    tracing::info!(
        "Synced invites for guild {}: {} added, {} updated, {} pruned, {} kept for history",
        guild_id,
        summary.added,
        summary.updated,
        summary.pruned,
        summary.retained
    );

    Ok(())
}

/// Whether the bot lacked the permissions for a request.
///
/// With the cache enabled serenity checks permissions itself and fails with a model
/// error before anything is sent; otherwise Discord answers 403.
pub fn is_missing_permissions(error: &serenity::Error) -> bool {
    match error {
        serenity::Error::Model(serenity::ModelError::InvalidPermissions { .. }) => true,
        serenity::Error::Http(http_error) => {
            http_error.status_code() == Some(serenity::StatusCode::FORBIDDEN)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_side_permission_failure_counts_as_missing_permissions() {
        let error = serenity::Error::Model(serenity::ModelError::InvalidPermissions {
            required: serenity::Permissions::CREATE_INSTANT_INVITE,
            present: serenity::Permissions::empty(),
        });

        assert!(is_missing_permissions(&error));
    }

    #[test]
    fn unrelated_failures_are_not_permission_problems() {
        assert!(!is_missing_permissions(&serenity::Error::Other("gateway closed")));
        assert!(!is_missing_permissions(&serenity::Error::Model(
            serenity::ModelError::InvalidUser
        )));
    }

    #[test]
    fn member_join_time_keeps_sub_second_precision() {
        let mut member = serenity::Member::default();
        member.user.id = serenity::UserId::new(42);
        member.user.name = "ada".to_string();
        member.joined_at = Some(
            serenity::Timestamp::parse("2024-01-02T03:04:05.123456Z").unwrap(),
        );

        let joined = JoinEvent::from(&member);

        assert_eq!(joined.id, 42);
        assert_eq!(joined.name, "ada");
        assert_eq!(
            joined.joined_at.unwrap().to_rfc3339(),
            "2024-01-02T03:04:05.123456+00:00"
        );
    }
}
