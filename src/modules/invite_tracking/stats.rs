use super::ledger::{JoinEvent, Ledger, RemoteInvite};
use std::collections::HashSet;

/// How many invited members the detailed view shows unless asked for everything.
pub const RECENT_JOINS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Discord still lists the invite.
    Active,
    /// Discord no longer lists the invite; only its history is left.
    Expired,
    /// The invite list couldn't be fetched, so validity is unknown.
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUsage {
    pub code: String,
    pub uses: u64,
    pub status: LinkStatus,
}

/// Invite totals for one member. Every code they created counts toward
/// `total_uses`, whatever its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteStats {
    pub total_uses: u64,
    pub codes: Vec<CodeUsage>,
}

impl InviteStats {
    pub fn active_links(&self) -> impl Iterator<Item = &CodeUsage> {
        self.codes.iter().filter(|c| c.status == LinkStatus::Active)
    }

    pub fn unconfirmed(&self) -> impl Iterator<Item = &CodeUsage> {
        self.codes.iter().filter(|c| c.status == LinkStatus::Unconfirmed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailedInviteStats {
    pub stats: InviteStats,
    /// Number of attributed joins before truncation.
    pub invited_total: usize,
    /// Most recent first.
    pub invited_users: Vec<JoinEvent>,
}

impl DetailedInviteStats {
    pub fn is_truncated(&self) -> bool {
        self.invited_users.len() < self.invited_total
    }
}

/// Sums the uses of every invite `user_id` created in the guild and classifies each
/// code against the live invite list. `remote` is `None` when that list couldn't be
/// fetched.
pub fn invite_stats_for(
    ledger: &Ledger,
    guild_id: u64,
    user_id: u64,
    remote: Option<&[RemoteInvite]>,
) -> InviteStats {
    let live: Option<HashSet<&str>> =
        remote.map(|invites| invites.iter().map(|i| i.code.as_str()).collect());

    let mut stats = InviteStats::default();
    let Some(section) = ledger.guild(guild_id) else {
        return stats;
    };

    for (code, record) in section {
        if record.creator != Some(user_id) {
            continue;
        }
        stats.total_uses += record.uses;
        let status = match &live {
            Some(live) if live.contains(code.as_str()) => LinkStatus::Active,
            Some(_) => LinkStatus::Expired,
            None => LinkStatus::Unconfirmed,
        };
        stats.codes.push(CodeUsage {
            code: code.clone(),
            uses: record.uses,
            status,
        });
    }

    stats
}

/// Like [`invite_stats_for`], plus every member who joined through those invites,
/// newest join first. Joins without a timestamp go last.
pub fn detailed_invite_stats_for(
    ledger: &Ledger,
    guild_id: u64,
    user_id: u64,
    remote: Option<&[RemoteInvite]>,
    include_all: bool,
) -> DetailedInviteStats {
    let stats = invite_stats_for(ledger, guild_id, user_id, remote);

    let mut invited_users: Vec<JoinEvent> = ledger
        .guild(guild_id)
        .into_iter()
        .flat_map(|section| section.values())
        .filter(|record| record.creator == Some(user_id))
        .flat_map(|record| record.invited_users().iter().cloned())
        .collect();
    invited_users.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));

    let invited_total = invited_users.len();
    if !include_all {
        invited_users.truncate(RECENT_JOINS_LIMIT);
    }

    DetailedInviteStats {
        stats,
        invited_total,
        invited_users,
    }
}
