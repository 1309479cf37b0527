use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A member who joined through a tracked invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEvent {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

/// Persisted state for one invite code.
///
/// `invited_users` stays `None` for invites created through `/createinvite` until a
/// sync or a join fills it in; readers treat that the same as an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    #[serde(default)]
    pub uses: u64,
    #[serde(default)]
    pub creator: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_users: Option<Vec<JoinEvent>>,
}

impl InviteRecord {
    pub fn invited_users(&self) -> &[JoinEvent] {
        self.invited_users.as_deref().unwrap_or_default()
    }

    fn has_history(&self) -> bool {
        !self.invited_users().is_empty()
    }
}

/// An invite as currently reported by Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInvite {
    pub code: String,
    pub uses: u64,
    pub inviter: Option<u64>,
}

/// Invite code -> record for a single guild.
pub type GuildLedger = BTreeMap<String, InviteRecord>;

/// Guild id -> invite code -> record. Serializes as the bare nested map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    guilds: BTreeMap<u64, GuildLedger>,
}

/// What a guild sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub pruned: usize,
    pub retained: usize,
}

impl SyncSummary {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.pruned == 0
    }
}

impl Ledger {
    pub fn guild(&self, guild_id: u64) -> Option<&GuildLedger> {
        self.guilds.get(&guild_id)
    }

    /// Returns the guild's section, creating an empty one if the guild was never synced.
    pub fn guild_mut(&mut self, guild_id: u64) -> &mut GuildLedger {
        self.guilds.entry(guild_id).or_default()
    }

    pub fn record(&self, guild_id: u64, code: &str) -> Option<&InviteRecord> {
        self.guild(guild_id).and_then(|g| g.get(code))
    }

    /// Merges the live invite list of a guild into its section.
    ///
    /// Use counts only ever grow, a known creator is never replaced, and codes that
    /// disappeared remotely are dropped only when nobody joined through them.
    pub fn sync_guild(&mut self, guild_id: u64, remote: &[RemoteInvite]) -> SyncSummary {
        let section = self.guild_mut(guild_id);
        let mut summary = SyncSummary::default();

        for invite in remote {
            match section.get_mut(&invite.code) {
                None => {
                    section.insert(
                        invite.code.clone(),
                        InviteRecord {
                            uses: invite.uses,
                            creator: invite.inviter,
                            invited_users: Some(Vec::new()),
                        },
                    );
                    summary.added += 1;
                }
                Some(record) => {
                    let before = record.clone();
                    record.uses = record.uses.max(invite.uses);
                    if record.creator.is_none() {
                        record.creator = invite.inviter;
                    }
                    record.invited_users.get_or_insert_with(Vec::new);
                    if *record != before {
                        summary.updated += 1;
                    }
                }
            }
        }

        let live: HashSet<&str> = remote.iter().map(|i| i.code.as_str()).collect();
        section.retain(|code, record| {
            if live.contains(code.as_str()) {
                return true;
            }
            if record.has_history() {
                summary.retained += 1;
                true
            } else {
                summary.pruned += 1;
                false
            }
        });

        summary
    }

    /// Attributes a join to the first invite (in Discord's order) whose use count moved
    /// past the stored one. Returns the matched code, or `None` when the join can't be
    /// attributed (vanity URL, untracked invite, stale snapshot).
    pub fn record_join(
        &mut self,
        guild_id: u64,
        member: JoinEvent,
        remote: &[RemoteInvite],
    ) -> Option<String> {
        let section = self.guild_mut(guild_id);

        for invite in remote {
            let Some(record) = section.get_mut(&invite.code) else {
                continue;
            };
            if invite.uses > record.uses {
                record.uses = invite.uses;
                record
                    .invited_users
                    .get_or_insert_with(Vec::new)
                    .push(member);
                return Some(invite.code.clone());
            }
        }

        None
    }

    /// Registers an invite created on behalf of `creator`.
    ///
    /// Any existing record for the code keeps its counters and history; only the
    /// creator is (re)assigned.
    pub fn track_invite(&mut self, guild_id: u64, code: &str, creator: u64) {
        let record = self.guild_mut(guild_id).entry(code.to_string()).or_default();
        record.creator = Some(creator);
    }

    /// Adds a record for an invite that showed up mid-session. Returns false if the code
    /// was already known.
    pub fn observe_invite(&mut self, guild_id: u64, invite: &RemoteInvite) -> bool {
        if self.record(guild_id, &invite.code).is_some() {
            return false;
        }
        self.guild_mut(guild_id).insert(
            invite.code.clone(),
            InviteRecord {
                uses: invite.uses,
                creator: invite.inviter,
                invited_users: Some(Vec::new()),
            },
        );
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    pub(crate) fn remote(code: &str, uses: u64, inviter: Option<u64>) -> RemoteInvite {
        RemoteInvite {
            code: code.to_string(),
            uses,
            inviter,
        }
    }

    pub(crate) fn joiner(id: u64, joined_at: Option<&str>) -> JoinEvent {
        JoinEvent {
            id,
            name: format!("member-{id}"),
            joined_at: joined_at.map(|s| {
                format!("{s}T00:00:00Z")
                    .parse()
                    .expect("valid test timestamp")
            }),
        }
    }

    const GUILD: u64 = 42;

    #[test]
    fn sync_inserts_new_invites_with_empty_history() {
        let mut ledger = Ledger::default();
        let summary = ledger.sync_guild(GUILD, &[remote("abc", 3, Some(7)), remote("def", 0, None)]);

        assert_eq!(summary.added, 2);
        let abc = ledger.record(GUILD, "abc").unwrap();
        assert_eq!(abc.uses, 3);
        assert_eq!(abc.creator, Some(7));
        assert_eq!(abc.invited_users, Some(vec![]));
        assert_eq!(ledger.record(GUILD, "def").unwrap().creator, None);
    }

    #[test]
    fn sync_with_no_invites_still_creates_the_section() {
        let mut ledger = Ledger::default();
        let summary = ledger.sync_guild(GUILD, &[]);

        assert!(summary.is_noop());
        assert_eq!(ledger.guild(GUILD), Some(&GuildLedger::new()));
    }

    #[test]
    fn sync_fills_missing_creator_but_keeps_a_known_one() {
        let mut ledger = Ledger::default();
        ledger.sync_guild(GUILD, &[remote("abc", 1, None), remote("def", 1, Some(1))]);
        ledger.sync_guild(GUILD, &[remote("abc", 2, Some(9)), remote("def", 2, Some(2))]);

        assert_eq!(ledger.record(GUILD, "abc").unwrap().creator, Some(9));
        assert_eq!(ledger.record(GUILD, "def").unwrap().creator, Some(1));
    }

    #[test]
    fn sync_backfills_history_for_records_created_by_command() {
        let mut ledger = Ledger::default();
        ledger.track_invite(GUILD, "abc", 5);
        assert_eq!(ledger.record(GUILD, "abc").unwrap().invited_users, None);

        let summary = ledger.sync_guild(GUILD, &[remote("abc", 0, Some(99))]);

        let record = ledger.record(GUILD, "abc").unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(record.invited_users, Some(vec![]));
        assert_eq!(record.creator, Some(5));
    }

    #[test]
    fn sync_prunes_only_vanished_invites_without_joins() {
        let mut ledger = Ledger::default();
        ledger.sync_guild(GUILD, &[remote("gone", 0, Some(1)), remote("kept", 0, Some(1))]);
        ledger.record_join(GUILD, joiner(10, None), &[remote("kept", 1, Some(1))]);

        let summary = ledger.sync_guild(GUILD, &[]);

        assert_eq!(summary.pruned, 1);
        assert_eq!(summary.retained, 1);
        assert!(ledger.record(GUILD, "gone").is_none());
        assert_eq!(ledger.record(GUILD, "kept").unwrap().invited_users().len(), 1);
    }

    #[test]
    fn sync_prunes_vanished_record_whose_history_is_absent() {
        let mut ledger = Ledger::default();
        ledger.track_invite(GUILD, "abc", 5);

        ledger.sync_guild(GUILD, &[]);

        assert!(ledger.record(GUILD, "abc").is_none());
    }

    #[test]
    fn join_is_attributed_to_the_invite_whose_count_grew() {
        let mut ledger = Ledger::default();
        ledger.sync_guild(GUILD, &[remote("a", 1, Some(1)), remote("b", 4, Some(2))]);

        let member = joiner(77, Some("2024-05-01"));
        let matched = ledger.record_join(
            GUILD,
            member.clone(),
            &[remote("a", 1, Some(1)), remote("b", 5, Some(2))],
        );

        assert_eq!(matched.as_deref(), Some("b"));
        let b = ledger.record(GUILD, "b").unwrap();
        assert_eq!(b.uses, 5);
        assert_eq!(b.invited_users(), &[member]);
        assert!(ledger.record(GUILD, "a").unwrap().invited_users().is_empty());
    }

    #[test]
    fn join_attribution_stops_at_the_first_match() {
        let mut ledger = Ledger::default();
        ledger.sync_guild(GUILD, &[remote("a", 0, None), remote("b", 0, None)]);

        let matched = ledger.record_join(
            GUILD,
            joiner(1, None),
            &[remote("b", 1, None), remote("a", 1, None)],
        );

        assert_eq!(matched.as_deref(), Some("b"));
        assert_eq!(ledger.record(GUILD, "a").unwrap().uses, 0);
        assert!(ledger.record(GUILD, "a").unwrap().invited_users().is_empty());
    }

    #[test]
    fn join_creates_history_for_command_created_records() {
        let mut ledger = Ledger::default();
        ledger.track_invite(GUILD, "abc", 5);

        let matched = ledger.record_join(GUILD, joiner(3, None), &[remote("abc", 1, Some(100))]);

        assert_eq!(matched.as_deref(), Some("abc"));
        assert_eq!(ledger.record(GUILD, "abc").unwrap().invited_users().len(), 1);
    }

    #[test]
    fn unmatched_join_changes_nothing() {
        let mut ledger = Ledger::default();
        ledger.sync_guild(GUILD, &[remote("a", 2, None)]);
        let before = ledger.clone();

        let matched = ledger.record_join(
            GUILD,
            joiner(1, None),
            &[remote("a", 2, None), remote("untracked", 8, None)],
        );

        assert_eq!(matched, None);
        assert_eq!(ledger, before);
    }

    #[test]
    fn join_in_unsynced_guild_initializes_an_empty_section() {
        let mut ledger = Ledger::default();

        let matched = ledger.record_join(GUILD, joiner(1, None), &[remote("a", 1, None)]);

        assert_eq!(matched, None);
        assert_eq!(ledger.guild(GUILD), Some(&GuildLedger::new()));
    }

    #[test]
    fn track_invite_reassigns_creator_and_keeps_history() {
        let mut ledger = Ledger::default();
        ledger.observe_invite(GUILD, &remote("abc", 0, Some(1000)));
        ledger.record_join(GUILD, joiner(3, None), &[remote("abc", 1, Some(1000))]);

        ledger.track_invite(GUILD, "abc", 5);

        let record = ledger.record(GUILD, "abc").unwrap();
        assert_eq!(record.creator, Some(5));
        assert_eq!(record.uses, 1);
        assert_eq!(record.invited_users().len(), 1);
    }

    #[test]
    fn observe_invite_leaves_known_codes_alone() {
        let mut ledger = Ledger::default();
        ledger.track_invite(GUILD, "abc", 5);

        assert!(!ledger.observe_invite(GUILD, &remote("abc", 0, Some(1000))));
        assert!(ledger.observe_invite(GUILD, &remote("def", 0, Some(1000))));
        assert_eq!(ledger.record(GUILD, "abc").unwrap().creator, Some(5));
    }

    #[test]
    fn reads_the_json_layout_written_by_older_versions() {
        let raw = r#"{
            "123": {
                "abc": {"uses": 2, "creator": 7, "invited_users": [
                    {"id": 8, "name": "eight", "joined_at": "2024-01-02T03:04:05.123456+00:00"},
                    {"id": 9, "name": "nine", "joined_at": null}
                ]},
                "def": {"uses": 0, "creator": 7}
            }
        }"#;

        let ledger: Ledger = serde_json::from_str(raw).unwrap();

        let abc = ledger.record(123, "abc").unwrap();
        assert_eq!(abc.invited_users().len(), 2);
        assert!(abc.invited_users()[0].joined_at.is_some());
        assert_eq!(abc.invited_users()[1].joined_at, None);
        assert_eq!(ledger.record(123, "def").unwrap().invited_users, None);
    }

    fn remote_lists() -> impl Strategy<Value = Vec<Vec<(u8, u64, Option<u8>)>>> {
        prop::collection::vec(
            prop::collection::vec((0u8..6, 0u64..50, prop::option::of(0u8..4)), 0..6),
            1..8,
        )
    }

    fn to_remote(batch: &[(u8, u64, Option<u8>)]) -> Vec<RemoteInvite> {
        batch
            .iter()
            .map(|(code, uses, inviter)| remote(&format!("c{code}"), *uses, inviter.map(u64::from)))
            .collect()
    }

    proptest! {
        #[test]
        fn uses_never_decrease(batches in remote_lists()) {
            let mut ledger = Ledger::default();
            for batch in &batches {
                let before = ledger.clone();
                let list = to_remote(batch);
                ledger.sync_guild(GUILD, &list);
                ledger.record_join(GUILD, joiner(1, None), &list);

                for (code, old) in before.guild(GUILD).into_iter().flatten() {
                    if let Some(new) = ledger.record(GUILD, code) {
                        prop_assert!(new.uses >= old.uses);
                    }
                }
            }
        }

        #[test]
        fn known_creator_is_never_replaced(batches in remote_lists()) {
            let mut ledger = Ledger::default();
            for batch in &batches {
                let before = ledger.clone();
                ledger.sync_guild(GUILD, &to_remote(batch));

                for (code, old) in before.guild(GUILD).into_iter().flatten() {
                    if let (Some(creator), Some(new)) = (old.creator, ledger.record(GUILD, code)) {
                        prop_assert_eq!(new.creator, Some(creator));
                    }
                }
            }
        }

        #[test]
        fn only_records_without_joins_are_pruned(batches in remote_lists()) {
            let mut ledger = Ledger::default();
            for (n, batch) in batches.iter().enumerate() {
                let list = to_remote(batch);
                let before = ledger.clone();
                ledger.sync_guild(GUILD, &list);

                for (code, old) in before.guild(GUILD).into_iter().flatten() {
                    if ledger.record(GUILD, code).is_none() {
                        prop_assert!(old.invited_users().is_empty());
                    }
                }
                ledger.record_join(GUILD, joiner(n as u64, None), &list);
            }
        }

        #[test]
        fn sync_is_idempotent(batches in remote_lists()) {
            let mut ledger = Ledger::default();
            for batch in &batches[..batches.len() - 1] {
                let list = to_remote(batch);
                ledger.sync_guild(GUILD, &list);
                ledger.record_join(GUILD, joiner(1, None), &list);
            }

            let last = to_remote(&batches[batches.len() - 1]);
            ledger.sync_guild(GUILD, &last);
            let once = ledger.clone();
            let summary = ledger.sync_guild(GUILD, &last);

            prop_assert_eq!(&ledger, &once);
            prop_assert!(summary.is_noop());
        }
    }
}
