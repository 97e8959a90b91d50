//! Post-run invariant checks over a [`SimulationResult`].
//!
//! 1. **Partition**: no mentor is listed twice in any written row.
//! 2. **Capacity**: no written row accepts more mentors than required.
//! 3. **No lost updates**: every successful write changes only the
//!    mentor it was planned for, relative to the previous write.
//! 4. **Cache convergence**: every mentor listed on the final row holds
//!    exactly that row in its session cache.
//!
//! Last-write-wins runs are expected to lose updates, and runs with
//! capacity enforcement off may overbook; [`InvariantViolation::is_tolerated`]
//! says which findings count against a seed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use mentorbook_core::config::WriteMode;
use mentorbook_core::model::{MembershipColumn, MembershipSets};
use mentorbook_core::MentorId;
use serde::Serialize;

use crate::{SimulationConfig, SimulationResult, TraceKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "invariant", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// A mentor appears in more than one place in a written row.
    Partition { round: u64, mentor: MentorId },
    Overbooked {
        round: u64,
        accepted: usize,
        required: u32,
    },
    /// A write silently changed another mentor's membership.
    LostUpdate {
        round: u64,
        mentor: MentorId,
        expected: Option<MembershipColumn>,
        found: Option<MembershipColumn>,
    },
    /// A mentor on the final row still caches something else.
    CacheDivergence {
        mentor: MentorId,
        cached_version: Option<u64>,
        repository_version: u64,
    },
}

impl InvariantViolation {
    /// True when the run's configuration permits this finding.
    #[must_use]
    pub const fn is_tolerated(&self, config: &SimulationConfig) -> bool {
        match self {
            Self::LostUpdate { .. } => matches!(config.write_mode, WriteMode::LastWriteWins),
            Self::Overbooked { .. } => !config.enforce_capacity,
            Self::Partition { .. } | Self::CacheDivergence { .. } => false,
        }
    }
}

fn column_name(column: Option<MembershipColumn>) -> &'static str {
    column.map_or("none", MembershipColumn::as_str)
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition { round, mentor } => {
                write!(f, "Partition: round {round} lists {mentor} more than once")
            }
            Self::Overbooked {
                round,
                accepted,
                required,
            } => write!(
                f,
                "Overbooked: round {round} accepted {accepted} of {required} required"
            ),
            Self::LostUpdate {
                round,
                mentor,
                expected,
                found,
            } => write!(
                f,
                "LostUpdate: round {round} moved {mentor} from {} to {}",
                column_name(*expected),
                column_name(*found)
            ),
            Self::CacheDivergence {
                mentor,
                cached_version,
                repository_version,
            } => write!(
                f,
                "CacheDivergence: {mentor} caches version {cached_version:?}, \
                 repository has {repository_version}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OracleResult {
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations the run's configuration does not tolerate.
    #[must_use]
    pub fn failures(&self, config: &SimulationConfig) -> Vec<&InvariantViolation> {
        self.violations
            .iter()
            .filter(|violation| !violation.is_tolerated(config))
            .collect()
    }

    #[must_use]
    pub fn count(&self, predicate: impl Fn(&InvariantViolation) -> bool) -> usize {
        self.violations.iter().filter(|v| predicate(v)).count()
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        self.violations.extend(other.violations);
        self
    }
}

fn duplicated(membership: &MembershipSets) -> Vec<MentorId> {
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for mentor in MembershipColumn::ALL
        .into_iter()
        .flat_map(|column| membership.get(column))
    {
        if !seen.insert(mentor) {
            repeated.insert(mentor.clone());
        }
    }
    repeated.into_iter().collect()
}

fn placement(membership: &MembershipSets) -> BTreeMap<MentorId, MembershipColumn> {
    MembershipColumn::ALL
        .into_iter()
        .flat_map(|column| {
            membership
                .get(column)
                .iter()
                .map(move |mentor| (mentor.clone(), column))
        })
        .collect()
}

pub struct BookingOracle;

impl BookingOracle {
    #[must_use]
    pub fn check_partition(result: &SimulationResult) -> OracleResult {
        let final_round = result.config.rounds;
        let violations = result
            .commits()
            .map(|(entry, membership)| (entry.round, membership))
            .chain(std::iter::once((final_round, &result.final_event.membership)))
            .flat_map(|(round, membership)| {
                duplicated(membership)
                    .into_iter()
                    .map(move |mentor| InvariantViolation::Partition { round, mentor })
            })
            .collect();
        OracleResult { violations }
    }

    #[must_use]
    pub fn check_capacity(result: &SimulationResult) -> OracleResult {
        let required = result.final_event.required_mentor_count;
        let violations = result
            .commits()
            .filter(|(_, membership)| membership.accepted.len() > required as usize)
            .map(|(entry, membership)| InvariantViolation::Overbooked {
                round: entry.round,
                accepted: membership.accepted.len(),
                required,
            })
            .collect();
        OracleResult { violations }
    }

    /// Replays writes in commit order. Each write may move its own mentor;
    /// any other mentor whose set differs from the previous write was
    /// clobbered by a plan computed on an older row.
    #[must_use]
    pub fn check_lost_updates(result: &SimulationResult) -> OracleResult {
        let mut previous = placement(&result.initial_membership);
        let mut violations = Vec::new();

        for entry in &result.trace {
            let TraceKind::Committed {
                mentor, membership, ..
            } = &entry.kind
            else {
                continue;
            };
            let written = placement(membership);
            let everyone: BTreeSet<&MentorId> = previous.keys().chain(written.keys()).collect();
            for other in everyone.into_iter().filter(|m| *m != mentor) {
                let expected = previous.get(other).copied();
                let found = written.get(other).copied();
                if expected != found {
                    violations.push(InvariantViolation::LostUpdate {
                        round: entry.round,
                        mentor: other.clone(),
                        expected,
                        found,
                    });
                }
            }
            previous = written;
        }
        OracleResult { violations }
    }

    #[must_use]
    pub fn check_cache_convergence(result: &SimulationResult) -> OracleResult {
        let row = &result.final_event;
        let violations = result
            .mentor_caches
            .iter()
            .filter(|cache| row.membership.column_of(&cache.mentor).is_some())
            .filter(|cache| cache.cached.as_ref() != Some(row))
            .map(|cache| InvariantViolation::CacheDivergence {
                mentor: cache.mentor.clone(),
                cached_version: cache.cached.as_ref().map(|event| event.version),
                repository_version: row.version,
            })
            .collect();
        OracleResult { violations }
    }

    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        Self::check_partition(result)
            .merge(Self::check_capacity(result))
            .merge(Self::check_lost_updates(result))
            .merge(Self::check_cache_convergence(result))
    }
}

#[cfg(test)]
mod tests {
    use super::{BookingOracle, InvariantViolation, duplicated};
    use crate::{SimulationConfig, SimulationResult, Simulator, TraceEntry, TraceKind};
    use mentorbook_core::config::WriteMode;
    use mentorbook_core::model::{MembershipColumn, MembershipSets};
    use mentorbook_core::protocol::Transition;
    use mentorbook_core::MentorId;

    fn ids(raw: &[&str]) -> Vec<MentorId> {
        raw.iter().map(|id| MentorId::new(*id)).collect()
    }

    fn committed(round: u64, mentor: &str, membership: MembershipSets) -> TraceEntry {
        TraceEntry {
            round,
            agent: 0,
            kind: TraceKind::Committed {
                transition: Transition::Accept,
                mentor: mentor.into(),
                read_version: round,
                version: round + 1,
                membership,
            },
        }
    }

    fn result_with(trace: Vec<TraceEntry>) -> SimulationResult {
        let mut sim = Simulator::new(SimulationConfig::default()).expect("world");
        let mut result = sim.run().expect("run");
        result.trace = trace;
        result.mentor_caches.clear();
        result.final_event.membership = MembershipSets::default();
        result
    }

    #[test]
    fn duplicates_are_found_within_and_across_sets() {
        let membership = MembershipSets {
            requesting: ids(&["a", "b"]),
            accepted: ids(&["b", "c", "c"]),
            declined: Vec::new(),
        };
        assert_eq!(duplicated(&membership), ids(&["b", "c"]));
    }

    #[test]
    fn clobbered_mentor_is_a_lost_update() {
        let trace = vec![
            committed(
                1,
                "m1",
                MembershipSets {
                    accepted: ids(&["m1"]),
                    ..MembershipSets::default()
                },
            ),
            // Planned on the pre-m1 row: m2's accept wipes out m1.
            committed(
                2,
                "m2",
                MembershipSets {
                    accepted: ids(&["m2"]),
                    ..MembershipSets::default()
                },
            ),
        ];
        let oracle = BookingOracle::check_lost_updates(&result_with(trace));
        assert_eq!(
            oracle.violations,
            vec![InvariantViolation::LostUpdate {
                round: 2,
                mentor: "m1".into(),
                expected: Some(MembershipColumn::Accepted),
                found: None,
            }]
        );
    }

    #[test]
    fn overbooking_is_tolerated_only_without_capacity_enforcement() {
        let trace = vec![committed(
            1,
            "m3",
            MembershipSets {
                accepted: ids(&["m1", "m2", "m3"]),
                ..MembershipSets::default()
            },
        )];
        let oracle = BookingOracle::check_capacity(&result_with(trace));
        assert_eq!(oracle.violations.len(), 1);

        let strict = SimulationConfig::default();
        let loose = SimulationConfig {
            enforce_capacity: false,
            ..strict
        };
        assert_eq!(oracle.failures(&strict).len(), 1);
        assert!(oracle.failures(&loose).is_empty());
    }

    #[test]
    fn lost_updates_are_tolerated_under_last_write_wins() {
        let violation = InvariantViolation::LostUpdate {
            round: 4,
            mentor: "m1".into(),
            expected: Some(MembershipColumn::Requesting),
            found: None,
        };
        let lww = SimulationConfig {
            write_mode: WriteMode::LastWriteWins,
            ..SimulationConfig::default()
        };
        assert!(violation.is_tolerated(&lww));
        assert!(!violation.is_tolerated(&SimulationConfig::default()));
        assert!(violation.to_string().contains("from requesting to none"));
    }

    #[test]
    fn conditional_runs_pass_every_check() {
        for seed in 0..8 {
            let mut sim = Simulator::new(SimulationConfig {
                seed,
                ..SimulationConfig::default()
            })
            .expect("world");
            let result = sim.run().expect("run");
            let oracle = BookingOracle::check_all(&result);
            assert!(oracle.passed(), "seed {seed}: {:?}", oracle.violations);
        }
    }
}
