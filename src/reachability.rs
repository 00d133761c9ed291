//! Reachability gating: which test groups are worth running.
//!
//! Phase 2 probes answer three questions -- is the server reachable over
//! IPv4, over IPv6, and over the multipath-capable variant. The gate here
//! turns those flags into the set of eligible test groups and assembles
//! the final ordered test list: groups keep a fixed sequence (v4/v6
//! first, multipath next, MPTCP always last) while the tests inside each
//! group are shuffled so traffic ordering does not correlate across runs.

use std::sync::Arc;

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::connectivity::NetworkType;
use crate::measurement::Measurement;

/// Success flags from the phase-2 reachability probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachabilityOutcome {
    pub ipv4: bool,
    pub ipv6: bool,
    pub multipath: bool,
}

impl ReachabilityOutcome {
    /// Any base reachability at all.
    pub fn any(&self) -> bool {
        self.ipv4 || self.ipv6 || self.multipath
    }
}

/// The four test groups, in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestGroup {
    V4,
    V6,
    Multipath,
    Mptcp,
}

impl TestGroup {
    /// Fixed group sequence; MPTCP always last.
    pub const ORDER: [TestGroup; 4] =
        [TestGroup::V4, TestGroup::V6, TestGroup::Multipath, TestGroup::Mptcp];
}

/// Gate controlling the MPTCP test group.
///
/// MPTCP tests used to crash older platforms when only one interface was
/// up, so the group runs only when the initial connectivity snapshot
/// showed both WiFi and cellular active, or the platform version meets
/// the configured minimum. Kept as a configurable predicate rather than a
/// hard-coded check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MptcpPolicy {
    pub min_platform_version: (u32, u32),
}

impl Default for MptcpPolicy {
    fn default() -> Self {
        Self { min_platform_version: (11, 3) }
    }
}

impl MptcpPolicy {
    pub fn permits(
        &self,
        initial_network_type: NetworkType,
        platform_version: Option<(u32, u32)>,
    ) -> bool {
        if initial_network_type.is_composite() {
            return true;
        }
        match platform_version {
            Some(version) => version >= self.min_platform_version,
            None => false,
        }
    }
}

/// Pure classification of probe flags into eligible groups.
///
/// IPv4 success enables the v4 group, IPv6 the v6 group. Multipath runs
/// whenever any probe succeeded -- without base reachability there is no
/// point probing multipath. `mptcp_permitted` carries the
/// [`MptcpPolicy`] decision (and the service-mode exclusion) made by the
/// caller.
pub fn eligible_groups(
    outcome: &ReachabilityOutcome,
    mptcp_permitted: bool,
) -> Vec<TestGroup> {
    let mut groups = Vec::new();
    if outcome.ipv4 {
        groups.push(TestGroup::V4);
    }
    if outcome.ipv6 {
        groups.push(TestGroup::V6);
    }
    if outcome.any() {
        groups.push(TestGroup::Multipath);
    }
    if mptcp_permitted {
        groups.push(TestGroup::Mptcp);
    }
    groups
}

/// The candidate tests of each group, before gating.
#[derive(Default)]
pub struct GroupedTests {
    pub v4: Vec<Arc<dyn Measurement>>,
    pub v6: Vec<Arc<dyn Measurement>>,
    pub multipath: Vec<Arc<dyn Measurement>>,
    pub mptcp: Vec<Arc<dyn Measurement>>,
}

impl GroupedTests {
    fn take(&mut self, group: TestGroup) -> Vec<Arc<dyn Measurement>> {
        match group {
            TestGroup::V4 => std::mem::take(&mut self.v4),
            TestGroup::V6 => std::mem::take(&mut self.v6),
            TestGroup::Multipath => std::mem::take(&mut self.multipath),
            TestGroup::Mptcp => std::mem::take(&mut self.mptcp),
        }
    }

    pub fn total(&self) -> usize {
        self.v4.len()
            + self.v6.len()
            + self.multipath.len()
            + self.mptcp.len()
    }
}

/// Build the final ordered test list from the eligible groups.
///
/// Tests are shuffled within each group; group boundaries and the group
/// sequence are fixed. The order is frozen once this returns.
pub fn assemble_tests(
    mut grouped: GroupedTests,
    eligible: &[TestGroup],
    rng: &mut impl Rng,
) -> Vec<Arc<dyn Measurement>> {
    let mut tests = Vec::new();

    for group in TestGroup::ORDER {
        if !eligible.contains(&group) {
            continue;
        }
        let mut members = grouped.take(group);
        members.shuffle(rng);
        if !members.is_empty() {
            info!("group {:?}: {} tests", group, members.len());
        }
        tests.extend(members);
    }

    tests
}
