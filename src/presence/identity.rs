use moka::sync::Cache;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::awareness::{PeerRecord, PeerUser};
use super::color::{self, ColorToken};

const ANONYMOUS_NAME: &str = "Anonymous";

/// What the authentication collaborator knows about the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub id: Option<String>,
}

impl UserProfile {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// The identity this session publishes, fixed for the lifetime of the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: String,
    pub display_name: String,
    pub color: ColorToken,
}

impl LocalIdentity {
    pub fn as_peer_user(&self) -> PeerUser {
        PeerUser {
            id: self.user_id.clone(),
            name: self.display_name.clone(),
            color: self.color.clone(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Base `(name, id)` for a profile before de-duplication.
///
/// Anonymous users get a random `anon-xxxxxxxx` id.
pub fn base_identity(profile: &UserProfile) -> (String, String) {
    let name = non_blank(&profile.name)
        .or_else(|| non_blank(&profile.email))
        .unwrap_or(ANONYMOUS_NAME)
        .to_string();
    let id = match non_blank(&profile.id).or_else(|| non_blank(&profile.email)) {
        Some(id) => id.to_string(),
        None => {
            let token = Uuid::new_v4().simple().to_string();
            format!("anon-{}", &token[..8])
        }
    };
    (name, id)
}

/// De-duplicate a base identity against the peers currently visible.
///
/// Name and id get the same numeric suffix, starting at `-2`, until neither
/// collides. The snapshot is not locked: two peers joining at the same
/// instant can still pick the same pair, and nothing fixes that afterwards.
pub fn resolve<'a, I>(base_name: &str, base_id: &str, peers: I) -> (String, String)
where
    I: IntoIterator<Item = &'a PeerRecord>,
{
    let mut names = HashSet::new();
    let mut ids = HashSet::new();
    for user in peers.into_iter().filter_map(|record| record.user.as_ref()) {
        names.insert(user.name.as_str());
        ids.insert(user.id.as_str());
    }

    if !names.contains(base_name) && !ids.contains(base_id) {
        return (base_name.to_string(), base_id.to_string());
    }

    let mut suffix = 2u64;
    loop {
        let name = format!("{}-{}", base_name, suffix);
        let id = format!("{}-{}", base_id, suffix);
        if !names.contains(name.as_str()) && !ids.contains(id.as_str()) {
            debug!("Identity {}/{} taken, using {}/{}", base_name, base_id, name, id);
            return (name, id);
        }
        suffix += 1;
    }
}

/// Resolved identities per document view and signed-in profile.
#[derive(Clone)]
pub struct IdentityCache {
    cache: Cache<(String, UserProfile), LocalIdentity>,
}

impl IdentityCache {
    pub fn new(time_to_idle: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_idle(time_to_idle)
                .build(),
        }
    }

    /// Return the identity cached for `profile` on `doc_id` or resolve and
    /// cache a new one. A different profile on the same document never
    /// inherits someone else's identity.
    pub fn get_or_resolve<'a, I>(&self, doc_id: &str, profile: &UserProfile, peers: I) -> LocalIdentity
    where
        I: IntoIterator<Item = &'a PeerRecord>,
    {
        let key = (doc_id.to_string(), profile.clone());
        if let Some(identity) = self.cache.get(&key) {
            return identity;
        }

        let identity = resolve_identity(profile, peers);
        info!(
            "Resolved identity {} ({}) for document {}",
            identity.display_name, identity.user_id, doc_id
        );
        self.cache.insert(key, identity.clone());
        identity
    }
}

/// Base identity, de-duplicated, with a freshly allocated color.
pub fn resolve_identity<'a, I>(profile: &UserProfile, peers: I) -> LocalIdentity
where
    I: IntoIterator<Item = &'a PeerRecord>,
{
    let (base_name, base_id) = base_identity(profile);
    let (display_name, user_id) = resolve(&base_name, &base_id, peers);
    LocalIdentity {
        user_id,
        display_name,
        color: color::allocate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peer(name: &str, id: &str) -> PeerRecord {
        PeerRecord {
            user: Some(PeerUser {
                id: id.to_string(),
                name: name.to_string(),
                color: ColorToken::new("#B22234"),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn unique_base_is_returned_unchanged() {
        let peers = vec![peer("Bob", "bob"), PeerRecord::default()];
        assert_eq!(
            resolve("Carol", "carol", &peers),
            ("Carol".to_string(), "carol".to_string())
        );
        assert_eq!(
            resolve("Carol", "carol", std::iter::empty()),
            ("Carol".to_string(), "carol".to_string())
        );
    }

    #[test]
    fn collision_appends_smallest_free_suffix() {
        let peers = vec![peer("Alice", "alice"), peer("Bob", "bob")];
        assert_eq!(
            resolve("Alice", "alice", &peers),
            ("Alice-2".to_string(), "alice-2".to_string())
        );
    }

    #[test]
    fn id_collision_alone_is_enough() {
        let peers = vec![peer("Someone else", "alice")];
        assert_eq!(
            resolve("Alice", "alice", &peers),
            ("Alice-2".to_string(), "alice-2".to_string())
        );
    }

    #[test]
    fn suffix_skips_pairs_taken_on_either_side() {
        let peers = vec![
            peer("Alice", "alice"),
            peer("Alice-2", "x"),
            peer("y", "alice-3"),
        ];
        let (name, id) = resolve("Alice", "alice", &peers);
        assert_eq!((name.as_str(), id.as_str()), ("Alice-4", "alice-4"));
        assert!(peers.iter().all(|p| p.display_name() != Some(name.as_str()) && p.user_id() != Some(id.as_str())));
    }

    #[test]
    fn resolve_is_deterministic_for_a_snapshot() {
        let peers = vec![peer("Alice", "alice"), peer("Alice-2", "alice-2")];
        let first = resolve("Alice", "alice", &peers);
        assert_eq!(first, resolve("Alice", "alice", &peers));
        assert_eq!(first.0, "Alice-3");
    }

    #[test]
    fn base_identity_falls_back_through_profile_fields() {
        let full = UserProfile {
            name: Some("Alice".into()),
            email: Some("alice@example.com".into()),
            id: Some("u-1".into()),
        };
        assert_eq!(base_identity(&full), ("Alice".into(), "u-1".into()));

        let email_only = UserProfile {
            email: Some("bob@example.com".into()),
            name: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(
            base_identity(&email_only),
            ("bob@example.com".into(), "bob@example.com".into())
        );

        let (name, id) = base_identity(&UserProfile::anonymous());
        assert_eq!(name, "Anonymous");
        assert!(id.starts_with("anon-"));
        assert_eq!(id.len(), "anon-".len() + 8);
    }

    #[test]
    fn cache_keeps_identity_per_document() {
        let cache = IdentityCache::new(Duration::from_secs(60));
        let profile = UserProfile {
            name: Some("Alice".into()),
            id: Some("alice".into()),
            ..Default::default()
        };

        let first = cache.get_or_resolve("doc-1", &profile, std::iter::empty());
        // A later snapshot would collide, but the view keeps its identity
        let crowded = vec![peer("Alice", "alice")];
        let again = cache.get_or_resolve("doc-1", &profile, &crowded);
        assert_eq!(first, again);

        let other_doc = cache.get_or_resolve("doc-2", &profile, &crowded);
        assert_eq!(other_doc.display_name, "Alice-2");
    }

    #[test]
    fn two_profiles_on_one_document_get_their_own_identity() {
        let cache = IdentityCache::new(Duration::from_secs(60));
        let alice = UserProfile {
            name: Some("Alice".into()),
            id: Some("alice".into()),
            ..Default::default()
        };
        let bob = UserProfile {
            name: Some("Bob".into()),
            id: Some("bob".into()),
            ..Default::default()
        };

        let first = cache.get_or_resolve("doc-1", &alice, std::iter::empty());
        assert_eq!(first.user_id, "alice");

        // Bob signs in on the same view after Alice signed out
        let second = cache.get_or_resolve("doc-1", &bob, std::iter::empty());
        assert_eq!((second.display_name.as_str(), second.user_id.as_str()), ("Bob", "bob"));

        // Alice coming back still gets her cached identity
        assert_eq!(cache.get_or_resolve("doc-1", &alice, std::iter::empty()), first);
    }

    fn peers_strategy() -> impl Strategy<Value = Vec<PeerRecord>> {
        let name = prop_oneof![Just("Alice"), Just("Alice-2"), Just("Alice-3"), Just("Alice-4"), Just("Bob")];
        let id = prop_oneof![Just("alice"), Just("alice-2"), Just("alice-3"), Just("alice-5"), Just("bob")];
        prop::collection::vec((name, id), 0..8)
            .prop_map(|users| users.into_iter().map(|(name, id)| peer(name, id)).collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn free_base_is_kept(
            base_name in "[A-Za-z]{1,6}",
            base_id in "[a-z0-9]{1,6}",
            users in prop::collection::vec(("[A-Za-z]{1,6}", "[a-z0-9]{1,6}"), 0..8),
        ) {
            prop_assume!(users.iter().all(|(name, id)| *name != base_name && *id != base_id));
            let peers: Vec<PeerRecord> = users.iter().map(|(name, id)| peer(name, id)).collect();
            prop_assert_eq!(resolve(&base_name, &base_id, &peers), (base_name, base_id));
        }

        #[test]
        fn taken_base_gets_smallest_free_suffix(peers in peers_strategy()) {
            let names: HashSet<&str> = peers.iter().filter_map(|p| p.display_name()).collect();
            let ids: HashSet<&str> = peers.iter().filter_map(|p| p.user_id()).collect();
            prop_assume!(names.contains("Alice") || ids.contains("alice"));

            let (name, id) = resolve("Alice", "alice", &peers);
            let suffix: u64 = name
                .strip_prefix("Alice-")
                .and_then(|n| n.parse().ok())
                .unwrap_or_else(|| panic!("no numeric suffix on {name}"));
            prop_assert!(suffix >= 2);
            prop_assert_eq!(&id, &format!("alice-{suffix}"));
            prop_assert!(!names.contains(name.as_str()));
            prop_assert!(!ids.contains(id.as_str()));
            for smaller in 2..suffix {
                let smaller_name = format!("Alice-{smaller}");
                let smaller_id = format!("alice-{smaller}");
                prop_assert!(
                    names.contains(smaller_name.as_str())
                        || ids.contains(smaller_id.as_str())
                );
            }
        }
    }
}
