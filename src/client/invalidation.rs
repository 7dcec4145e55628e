//! What to patch, mark stale and refetch once the server confirms a write.
//!
//! Exact server values are written in place wherever the entity is cached.
//! Entries whose membership or order may have shifted are refetched when
//! someone is looking at them and otherwise only marked stale, so the next
//! activation reloads them.

use std::collections::HashSet;

use crate::models::{
    comment::Comment,
    vote::{VoteOutcome, VoteTarget},
};

use super::cache::{CacheTables, QueryKey};

/// Keys the caller should refetch after the cache lock is released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refresh {
    pub refetch: Vec<QueryKey>,
}

impl Refresh {
    pub fn is_empty(&self) -> bool {
        self.refetch.is_empty()
    }
}

/// Writes the authoritative counters to every view of `target`. Listings of
/// the same family that nobody watches may now be out of order and are
/// marked stale.
pub fn after_vote_confirmed(
    tables: &mut CacheTables,
    target: VoteTarget,
    outcome: VoteOutcome,
) -> Refresh {
    let touched = tables.patch(target, |c| {
        *c.points = outcome.count;
        *c.is_upvoted = outcome.is_upvoted;
    });

    let family: Vec<QueryKey> = tables
        .keys()
        .into_iter()
        .filter(|key| is_listing(key) && key.may_contain(target) && !tables.is_active(key))
        .filter(|key| touched.contains(key) || same_container(tables, key, target))
        .collect();
    tables.mark_stale(&family);

    Refresh::default()
}

/// Replaces the placeholder in `listing_key` with `comment` at the same
/// position, bumps the reply count of every cached ancestor, and invalidates
/// the entries whose contents depend on the new comment. When the chain of
/// ancestors breaks at one that is not cached, every comment listing of the
/// post is invalidated instead of left with an old count.
pub fn after_comment_confirmed(
    tables: &mut CacheTables,
    listing_key: &QueryKey,
    placeholder_id: i64,
    comment: &Comment,
) -> Refresh {
    if !tables.replace_comment(listing_key, placeholder_id, comment.clone()) {
        tracing::debug!(placeholder_id, "placeholder no longer cached");
    }

    let mut ancestor = comment.parent_comment_id;
    let mut chain_broken = false;
    let mut steps = 0;
    while let Some(id) = ancestor {
        if steps > comment.depth {
            break;
        }
        tables.patch(VoteTarget::comment(id), |c| *c.comment_count += 1);
        match tables.find_comment(id) {
            Some(found) => ancestor = found.parent_comment_id,
            None => {
                chain_broken = true;
                break;
            }
        }
        steps += 1;
    }

    let container = comment.container();
    let mut affected = vec![QueryKey::Post(comment.post_id)];
    affected.extend(tables.keys().into_iter().filter(|key| match key {
        QueryKey::Comments { listing, .. } => {
            listing.container == container && key != listing_key
        }
        _ => false,
    }));
    if chain_broken {
        affected.extend(
            tables
                .comment_listings_of_post(comment.post_id)
                .into_iter()
                .filter(|key| key != listing_key),
        );
    }
    affected.extend(
        tables
            .keys_containing(VoteTarget::post(comment.post_id))
            .into_iter()
            .filter(|key| matches!(key, QueryKey::Posts { .. })),
    );

    invalidate(tables, affected)
}

/// Every post listing may now hold the new post.
pub fn after_post_created(tables: &mut CacheTables) -> Refresh {
    let listings = tables
        .keys()
        .into_iter()
        .filter(|key| matches!(key, QueryKey::Posts { .. }))
        .collect();
    invalidate(tables, listings)
}

/// Refetch what is being watched, mark everything else stale.
fn invalidate(tables: &mut CacheTables, keys: Vec<QueryKey>) -> Refresh {
    let mut seen = HashSet::new();
    let keys: Vec<QueryKey> = keys
        .into_iter()
        .filter(|key| tables.contains_key(key) && seen.insert(key.clone()))
        .collect();
    tables.mark_stale(&keys);

    Refresh {
        refetch: keys
            .into_iter()
            .filter(|key| tables.is_active(key))
            .collect(),
    }
}

fn is_listing(key: &QueryKey) -> bool {
    matches!(key, QueryKey::Posts { .. } | QueryKey::Comments { .. })
}

/// A comment listing over the same container as the voted comment.
fn same_container(tables: &CacheTables, key: &QueryKey, target: VoteTarget) -> bool {
    let QueryKey::Comments { listing, .. } = key else {
        return true;
    };
    tables
        .find_comment(target.id)
        .is_some_and(|c| c.container() == listing.container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::{
        CachedValue, QueryCache,
        tests::{comment, comments_key, page, post, posts_key},
    };
    use crate::models::{
        comment::{CommentListing, Container},
        pagination::{Order, SortBy, Sorting},
        post::PostListing,
    };

    #[test]
    fn confirmed_vote_writes_exact_values_and_stales_idle_listings() {
        let cache = QueryCache::new();
        let recent = QueryKey::Posts {
            listing: PostListing {
                filter: Default::default(),
                sorting: Sorting {
                    sort_by: SortBy::Recent,
                    order: Order::Desc,
                },
            },
            page: 1,
        };
        cache.set(posts_key(), CachedValue::Posts(page(vec![post(1, 5)])));
        cache.set(recent.clone(), CachedValue::Posts(page(vec![post(1, 5)])));
        cache.set(QueryKey::Post(1), CachedValue::Post(post(1, 5)));
        cache.activate(&posts_key());

        let outcome = VoteOutcome {
            count: 9,
            is_upvoted: true,
        };
        let refresh = cache.write(|t| after_vote_confirmed(t, VoteTarget::post(1), outcome));
        assert!(refresh.is_empty());

        for key in [posts_key(), recent.clone(), QueryKey::Post(1)] {
            let counters = cache.get(&key).and_then(|v| v.counters_of(VoteTarget::post(1)));
            assert_eq!(counters, Some((9, true, 0)));
        }
        assert!(!cache.is_stale(&posts_key()));
        assert!(cache.is_stale(&recent));
        assert!(!cache.is_stale(&QueryKey::Post(1)));
    }

    #[test]
    fn confirmed_comment_bumps_ancestors_and_invalidates_dependents() {
        let cache = QueryCache::new();
        let top = comments_key(Container::Post(7));
        let replies = comments_key(Container::Comment(1));
        let replies_by_recent = QueryKey::first_comments(CommentListing {
            container: Container::Comment(1),
            sorting: Sorting {
                sort_by: SortBy::Recent,
                order: Order::Desc,
            },
        });

        let mut listed_post = post(7, 0);
        listed_post.comment_count = 1;
        cache.set(posts_key(), CachedValue::Posts(page(vec![listed_post.clone()])));
        cache.set(QueryKey::Post(7), CachedValue::Post(listed_post));
        let mut parent = comment(1, 7, None, 0);
        parent.comment_count = 0;
        cache.set(top.clone(), CachedValue::Comments(page(vec![parent])));
        cache.set(replies_by_recent.clone(), CachedValue::Comments(page(vec![])));
        cache.activate(&QueryKey::Post(7));

        cache.write(|t| t.prepend_comment(&replies, comment(-1, 7, Some(1), 1)));

        let confirmed = comment(42, 7, Some(1), 1);
        let refresh = cache.write(|t| after_comment_confirmed(t, &replies, -1, &confirmed));

        let value = cache.get(&replies).unwrap();
        let CachedValue::Comments(listed) = value else {
            panic!("expected a comment page");
        };
        assert_eq!(listed.data[0].id, 42);

        let parent_count = cache
            .get(&top)
            .and_then(|v| v.counters_of(VoteTarget::comment(1)))
            .map(|(_, _, count)| count);
        assert_eq!(parent_count, Some(1));

        assert_eq!(refresh.refetch, vec![QueryKey::Post(7)]);
        assert!(cache.is_stale(&replies_by_recent));
        assert!(cache.is_stale(&posts_key()));
        assert!(!cache.is_stale(&replies));
    }

    #[test]
    fn reply_below_an_uncached_ancestor_invalidates_the_post_threads() {
        let cache = QueryCache::new();
        let top = comments_key(Container::Post(7));
        let middle = comments_key(Container::Comment(1));
        let deep = comments_key(Container::Comment(2));
        let other_post = comments_key(Container::Post(8));

        let mut root = comment(1, 7, None, 0);
        root.comment_count = 1;
        cache.set(top.clone(), CachedValue::Comments(page(vec![root])));
        cache.set(other_post.clone(), CachedValue::Comments(page(vec![comment(5, 8, None, 0)])));
        cache.activate(&top);

        // Comment 2 (the reply to 1) is not in any cached page.
        cache.write(|t| t.prepend_comment(&deep, comment(-1, 7, Some(2), 2)));
        let confirmed = comment(3, 7, Some(2), 2);
        let refresh = cache.write(|t| after_comment_confirmed(t, &deep, -1, &confirmed));

        assert!(cache.get(&middle).is_none());
        assert!(cache.is_stale(&top));
        assert!(refresh.refetch.contains(&top));
        assert!(!cache.is_stale(&other_post));
        assert!(!cache.is_stale(&deep));
    }
}
