use std::collections::BTreeSet;
use std::fmt;

use daybook_core::entity::Scope;
use daybook_core::model::task::{Task, TaskOrder};
use daybook_core::policy;

use crate::client::SimClient;
use crate::network::ClientId;
use crate::server::SimulatedServer;

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// A broken invariant, with enough detail to start a replay investigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The same id appears twice in one collection.
    DuplicateId { client: ClientId, id: String },
    /// A placeholder survived after every write was answered.
    LeftoverPlaceholder { client: ClientId, id: String },
    /// Mutations still awaiting an outcome or an echo at quiescence.
    Unsettled { client: ClientId, pending: usize },
    /// A record belonging to another account reached the collection.
    ForeignRecord { client: ClientId, id: String },
    /// The collection differs from the server's rows in its scope.
    Divergence {
        client: ClientId,
        missing: Vec<String>,
        extra: Vec<String>,
        /// Present on both sides with different contents.
        differing: Vec<String>,
    },
    /// Same records, wrong display order.
    Misordered { client: ClientId },
    /// Re-delivering an already applied change altered the collection.
    Idempotence { client: ClientId, change_index: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { client, id } => write!(f, "DuplicateId: client {client} holds {id} twice"),
            Self::LeftoverPlaceholder { client, id } => {
                write!(f, "LeftoverPlaceholder: client {client} still shows {id}")
            }
            Self::Unsettled { client, pending } => {
                write!(f, "Unsettled: client {client} has {pending} pending mutations at quiescence")
            }
            Self::ForeignRecord { client, id } => {
                write!(f, "ForeignRecord: client {client} shows another owner's {id}")
            }
            Self::Divergence {
                client,
                missing,
                extra,
                differing,
            } => write!(
                f,
                "Divergence: client {client} differs from server \
                 (missing={missing:?}, extra={extra:?}, differing={differing:?})"
            ),
            Self::Misordered { client } => write!(f, "Misordered: client {client} is not in display order"),
            Self::Idempotence { client, change_index } => write!(
                f,
                "Idempotence: re-applying change #{change_index} altered client {client}"
            ),
        }
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Checks run once every message has been delivered.
///
/// 1. **Uniqueness**: no id appears twice in a collection.
/// 2. **Settlement**: no placeholders and no pending mutations remain.
/// 3. **Isolation**: no record of another owner is visible.
/// 4. **Convergence**: each collection equals the server's rows for its
///    owner and scope, in display order.
/// 5. **Idempotence**: re-delivering every observed change is a no-op.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Run every check against every client.
    ///
    /// The idempotence check re-applies changes, so it runs last.
    #[must_use]
    pub fn check_all(server: &SimulatedServer, clients: &mut [SimClient]) -> OracleResult {
        let mut result = OracleResult::pass();
        for client in clients.iter() {
            result = result
                .merge(Self::check_uniqueness(client))
                .merge(Self::check_settled(client))
                .merge(Self::check_isolation(client))
                .merge(Self::check_convergence(server, client));
        }
        for client in clients.iter_mut() {
            result = result.merge(Self::check_idempotence(client));
        }
        result
    }

    #[must_use]
    pub fn check_uniqueness(client: &SimClient) -> OracleResult {
        let mut seen = BTreeSet::new();
        let violations = client
            .engine()
            .records()
            .iter()
            .filter(|task| !seen.insert(task.id.as_str()))
            .map(|task| InvariantViolation::DuplicateId {
                client: client.id(),
                id: task.id.clone(),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_settled(client: &SimClient) -> OracleResult {
        let engine = client.engine();
        let mut violations: Vec<InvariantViolation> = engine
            .records()
            .iter()
            .filter(|task| engine.is_placeholder(&task.id))
            .map(|task| InvariantViolation::LeftoverPlaceholder {
                client: client.id(),
                id: task.id.clone(),
            })
            .collect();
        if engine.pending_len() > 0 {
            violations.push(InvariantViolation::Unsettled {
                client: client.id(),
                pending: engine.pending_len(),
            });
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_isolation(client: &SimClient) -> OracleResult {
        let violations = client
            .engine()
            .records()
            .iter()
            .filter(|task| task.owner_id != client.owner())
            .map(|task| InvariantViolation::ForeignRecord {
                client: client.id(),
                id: task.id.clone(),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_convergence(server: &SimulatedServer, client: &SimClient) -> OracleResult {
        let mut expected: Vec<Task> = server
            .rows_for(client.owner())
            .into_iter()
            .filter(|task| client.scope().contains(task))
            .collect();
        policy::apply(&TaskOrder, &mut expected);

        let actual = client.engine().records();
        if actual == expected.as_slice() {
            return OracleResult::pass();
        }

        let missing: Vec<String> = expected
            .iter()
            .filter(|task| !actual.iter().any(|a| a.id == task.id))
            .map(|task| task.id.clone())
            .collect();
        let extra: Vec<String> = actual
            .iter()
            .filter(|task| !expected.iter().any(|e| e.id == task.id))
            .map(|task| task.id.clone())
            .collect();
        let differing: Vec<String> = actual
            .iter()
            .filter(|task| expected.iter().any(|e| e.id == task.id && e != *task))
            .map(|task| task.id.clone())
            .collect();

        let violation = if missing.is_empty() && extra.is_empty() && differing.is_empty() {
            InvariantViolation::Misordered { client: client.id() }
        } else {
            InvariantViolation::Divergence {
                client: client.id(),
                missing,
                extra,
                differing,
            }
        };
        OracleResult::from_violations(vec![violation])
    }

    #[must_use]
    pub fn check_idempotence(client: &mut SimClient) -> OracleResult {
        match client.replay_observed() {
            None => OracleResult::pass(),
            Some(change_index) => OracleResult::from_violations(vec![InvariantViolation::Idempotence {
                client: client.id(),
                change_index,
            }]),
        }
    }
}
