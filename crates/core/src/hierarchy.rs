//! Cycle detection for the account hierarchy.
//!
//! The hierarchy is stored as parent ids only, so a re-parent is legal iff
//! walking up from the proposed parent never reaches the account being moved.
//! [`ParentWalk`] performs that walk without doing any IO itself: the caller
//! looks up the parent of [`ParentWalk::cursor`] and feeds it back through
//! [`ParentWalk::advance`]. Storage backends drive it from a lock-holding
//! critical section or from inside a database transaction.

use crate::error::{LedgerError, LedgerResult};
use crate::id::AccountId;

/// What the caller should do after an [`ParentWalk::advance`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WalkStep {
    /// Look up the parent of this account and advance again.
    Next(AccountId),
    /// Reached a root; the re-parent is acyclic.
    Clear,
}

/// Bounded upward walk from a proposed parent.
#[derive(Debug, Clone)]
pub struct ParentWalk {
    account: AccountId,
    parent: AccountId,
    cursor: AccountId,
    bound: usize,
    remaining: usize,
}

impl ParentWalk {
    /// Begin checking whether `account` may be placed under `new_parent`.
    ///
    /// `account_count` bounds the walk; a chain longer than the number of
    /// accounts can only come from corrupt data.
    pub fn start(
        account: AccountId,
        new_parent: AccountId,
        account_count: usize,
    ) -> LedgerResult<Self> {
        if account == new_parent {
            return Err(LedgerError::CyclicHierarchy {
                account,
                parent: new_parent,
            });
        }

        Ok(Self {
            account,
            parent: new_parent,
            cursor: new_parent,
            bound: account_count,
            remaining: account_count,
        })
    }

    /// Account whose parent must be supplied to the next `advance`.
    pub fn cursor(&self) -> AccountId {
        self.cursor
    }

    pub fn advance(&mut self, parent_of_cursor: Option<AccountId>) -> LedgerResult<WalkStep> {
        let Some(next) = parent_of_cursor else {
            return Ok(WalkStep::Clear);
        };

        if next == self.account {
            return Err(LedgerError::CyclicHierarchy {
                account: self.account,
                parent: self.parent,
            });
        }

        if self.remaining == 0 {
            return Err(LedgerError::Inconsistent(format!(
                "parent chain above {} is longer than the {} registered accounts",
                self.parent, self.bound
            )));
        }

        self.remaining -= 1;
        self.cursor = next;
        Ok(WalkStep::Next(next))
    }

    /// Drive the walk to completion with a synchronous parent lookup.
    ///
    /// `parent_of` returns the parent of an existing account; a missing
    /// account mid-chain is reported by the lookup itself.
    pub fn run<F>(mut self, mut parent_of: F) -> LedgerResult<()>
    where
        F: FnMut(AccountId) -> LedgerResult<Option<AccountId>>,
    {
        loop {
            let parent = parent_of(self.cursor)?;
            match self.advance(parent)? {
                WalkStep::Next(_) => continue,
                WalkStep::Clear => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn chain(len: usize) -> (Vec<AccountId>, HashMap<AccountId, Option<AccountId>>) {
        let ids: Vec<AccountId> = (0..len).map(|_| AccountId::new()).collect();
        let mut parents = HashMap::new();
        for (i, id) in ids.iter().enumerate() {
            parents.insert(*id, if i == 0 { None } else { Some(ids[i - 1]) });
        }
        (ids, parents)
    }

    fn check(
        parents: &HashMap<AccountId, Option<AccountId>>,
        account: AccountId,
        new_parent: AccountId,
    ) -> LedgerResult<()> {
        ParentWalk::start(account, new_parent, parents.len())?.run(|id| {
            parents
                .get(&id)
                .copied()
                .ok_or_else(|| LedgerError::not_found("account", id))
        })
    }

    #[test]
    fn self_parent_is_cyclic() {
        let (ids, parents) = chain(1);
        assert!(matches!(
            check(&parents, ids[0], ids[0]),
            Err(LedgerError::CyclicHierarchy { .. })
        ));
    }

    #[test]
    fn descendant_parent_is_cyclic() {
        let (ids, parents) = chain(4);
        let err = check(&parents, ids[1], ids[3]).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CyclicHierarchy {
                account: ids[1],
                parent: ids[3]
            }
        );
    }

    #[test]
    fn ancestor_parent_is_fine() {
        let (ids, parents) = chain(4);
        assert_eq!(check(&parents, ids[3], ids[0]), Ok(()));
    }

    #[test]
    fn corrupt_loop_hits_the_bound() {
        // a -> b -> c -> b: a loop that does not contain the moved account.
        let (ids, mut parents) = chain(3);
        parents.insert(ids[1], Some(ids[2]));
        let moved = AccountId::new();
        parents.insert(moved, None);

        let err = check(&parents, moved, ids[2]).unwrap_err();
        assert!(matches!(err, LedgerError::Inconsistent(_)), "{err:?}");
    }

    proptest! {
        #[test]
        fn rejects_exactly_descendants(
            links in proptest::collection::vec(proptest::option::of(any::<prop::sample::Index>()), 1..24),
            pick in any::<(prop::sample::Index, prop::sample::Index)>(),
        ) {
            // Node i may only point at an earlier node, so the input is a forest.
            let ids: Vec<AccountId> = (0..links.len()).map(|_| AccountId::new()).collect();
            let mut parents = HashMap::new();
            for (i, link) in links.iter().enumerate() {
                let parent = match link {
                    Some(idx) if i > 0 => Some(ids[idx.index(i)]),
                    _ => None,
                };
                parents.insert(ids[i], parent);
            }

            let account = ids[pick.0.index(ids.len())];
            let new_parent = ids[pick.1.index(ids.len())];

            let mut is_descendant = false;
            let mut cursor = Some(new_parent);
            while let Some(id) = cursor {
                if id == account {
                    is_descendant = true;
                    break;
                }
                cursor = parents[&id];
            }

            let result = check(&parents, account, new_parent);
            if is_descendant {
                let is_cyclic = matches!(result, Err(LedgerError::CyclicHierarchy { .. }));
                prop_assert!(is_cyclic);
            } else {
                prop_assert_eq!(result, Ok(()));
            }
        }
    }
}
