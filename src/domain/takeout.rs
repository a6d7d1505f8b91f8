//! Pickup-need evaluation over a building or a building section.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::fullness::FullnessTracker;
use crate::models::{
    Building, BuildingSection, Container, ContainersTakeoutRequest, MassRuleCommit,
    TakeoutCondition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoutReason {
    Mass,
    Time,
}

/// Which scope's mass rule a container's fullness tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum MassRuleTrigger {
    None,
    Building(i64),
    Section(i64),
}

/// Aggregate evaluation shared by buildings and sections.
pub trait TakeoutScope: Sync {
    fn trackers(&self) -> Box<dyn Iterator<Item = &FullnessTracker> + '_>;

    fn condition(&self) -> Option<&TakeoutCondition>;

    fn takeout_notified(&self) -> bool;

    fn current_mass(&self) -> i64 {
        self.trackers().map(FullnessTracker::full_mass).sum()
    }

    fn meets_mass_condition(&self) -> bool {
        self.condition()
            .and_then(|c| c.mass)
            .is_some_and(|threshold| self.current_mass() > threshold)
    }

    fn meets_time_condition(&self, now: DateTime<Utc>) -> bool {
        self.trackers().any(|t| t.check_time_conditions(now))
    }

    fn needs_takeout(&self, now: DateTime<Utc>) -> bool {
        self.meets_mass_condition() || self.meets_time_condition(now)
    }

    fn takeout_reasons(&self, now: DateTime<Utc>) -> Vec<TakeoutReason> {
        let mut reasons = Vec::new();
        if self.meets_mass_condition() {
            reasons.push(TakeoutReason::Mass);
        }
        if self.meets_time_condition(now) {
            reasons.push(TakeoutReason::Time);
        }
        reasons
    }

    fn containers_for_takeout(&self) -> Vec<&Container> {
        self.trackers()
            .filter(|t| t.is_full())
            .map(FullnessTracker::container)
            .collect()
    }

    fn contains_container(&self, container_id: i64) -> bool {
        self.trackers().any(|t| t.container().id == container_id)
    }
}

#[derive(Debug, Clone)]
pub struct SectionScope {
    pub section: BuildingSection,
    pub condition: Option<TakeoutCondition>,
    pub trackers: Vec<FullnessTracker>,
}

impl TakeoutScope for SectionScope {
    fn trackers(&self) -> Box<dyn Iterator<Item = &FullnessTracker> + '_> {
        Box::new(self.trackers.iter())
    }

    fn condition(&self) -> Option<&TakeoutCondition> {
        self.condition.as_ref()
    }

    fn takeout_notified(&self) -> bool {
        self.section.takeout_notified
    }
}

/// A building with its sections. Containers attached to a section live in
/// that section's scope; the rest live in `unsectioned`.
#[derive(Debug, Clone)]
pub struct BuildingScope {
    pub building: Building,
    pub condition: Option<TakeoutCondition>,
    pub sections: Vec<SectionScope>,
    pub unsectioned: Vec<FullnessTracker>,
}

impl BuildingScope {
    pub fn has_sections(&self) -> bool {
        !self.sections.is_empty()
    }

    pub fn section(&self, section_id: i64) -> Option<&SectionScope> {
        self.sections.iter().find(|s| s.section.id == section_id)
    }

    /// Scopes whose one-shot notify gate is evaluated: every section when
    /// the building is split, the building itself otherwise.
    pub fn notify_scopes(&self) -> Vec<ScopeRef<'_>> {
        if self.has_sections() {
            self.sections.iter().map(ScopeRef::Section).collect()
        } else {
            vec![ScopeRef::Building(self)]
        }
    }

    pub fn mass_rule_trigger(&self, container: &Container) -> MassRuleTrigger {
        if let Some(section) = container.section_id.and_then(|id| self.section(id)) {
            if section.meets_mass_condition() {
                return MassRuleTrigger::Section(section.section.id);
            }
        }
        if !self.has_sections() && self.meets_mass_condition() {
            return MassRuleTrigger::Building(self.building.id);
        }
        MassRuleTrigger::None
    }
}

impl TakeoutScope for BuildingScope {
    fn trackers(&self) -> Box<dyn Iterator<Item = &FullnessTracker> + '_> {
        Box::new(
            self.unsectioned
                .iter()
                .chain(self.sections.iter().flat_map(|s| s.trackers.iter())),
        )
    }

    fn condition(&self) -> Option<&TakeoutCondition> {
        self.condition.as_ref()
    }

    fn takeout_notified(&self) -> bool {
        self.building.takeout_notified
    }

    fn needs_takeout(&self, now: DateTime<Utc>) -> bool {
        self.meets_mass_condition()
            || self.meets_time_condition(now)
            || self.sections.iter().any(|s| s.needs_takeout(now))
    }
}

/// Borrowed handle to either kind of scope.
#[derive(Debug, Clone, Copy)]
pub enum ScopeRef<'a> {
    Building(&'a BuildingScope),
    Section(&'a SectionScope),
}

impl<'a> ScopeRef<'a> {
    pub fn as_scope(&self) -> &'a dyn TakeoutScope {
        match *self {
            ScopeRef::Building(b) => b,
            ScopeRef::Section(s) => s,
        }
    }

    pub fn building_id(&self) -> i64 {
        match self {
            ScopeRef::Building(b) => b.building.id,
            ScopeRef::Section(s) => s.section.building_id,
        }
    }

    pub fn section_id(&self) -> Option<i64> {
        match self {
            ScopeRef::Building(_) => None,
            ScopeRef::Section(s) => Some(s.section.id),
        }
    }

    /// Commits for exactly this scope and resolving pickups inside it.
    pub fn is_mass_condition_committed(
        &self,
        commits: &[MassRuleCommit],
        takeouts: &[ContainersTakeoutRequest],
    ) -> bool {
        is_mass_condition_committed(self.building_id(), self.section_id(), commits, takeouts)
    }

    /// What the one-shot gate would announce for this scope, if anything.
    /// A mass breach that is already committed does not count again.
    pub fn notify_decision(
        &self,
        commits: &[MassRuleCommit],
        takeouts: &[ContainersTakeoutRequest],
        now: DateTime<Utc>,
    ) -> Option<NotifyDecision> {
        let evaluated = self.as_scope();
        if evaluated.takeout_notified() {
            return None;
        }

        let fresh_mass = evaluated.meets_mass_condition()
            && !self.is_mass_condition_committed(commits, takeouts);
        let reasons: Vec<TakeoutReason> = evaluated
            .takeout_reasons(now)
            .into_iter()
            .filter(|r| *r != TakeoutReason::Mass || fresh_mass)
            .collect();
        if reasons.is_empty() {
            return None;
        }

        Some(NotifyDecision {
            building_id: self.building_id(),
            section_id: self.section_id(),
            commit_mass: fresh_mass,
            reasons,
            container_ids: evaluated
                .containers_for_takeout()
                .iter()
                .map(|c| c.id)
                .collect(),
        })
    }
}

/// Owned outcome of evaluating one notify scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyDecision {
    pub building_id: i64,
    pub section_id: Option<i64>,
    pub commit_mass: bool,
    pub reasons: Vec<TakeoutReason>,
    pub container_ids: Vec<i64>,
}

/// A mass breach stays committed until a pickup that left no container in
/// the scope full is confirmed after the commit.
pub fn is_mass_condition_committed(
    building_id: i64,
    section_id: Option<i64>,
    commits: &[MassRuleCommit],
    takeouts: &[ContainersTakeoutRequest],
) -> bool {
    let last_resolved = takeouts
        .iter()
        .filter(|t| t.building_id == building_id && t.resolved_scope)
        .filter(|t| section_id.is_none() || t.section_id == section_id)
        .filter_map(|t| t.confirmed_at)
        .max();

    commits
        .iter()
        .filter(|c| c.building_id == building_id && c.section_id == section_id)
        .any(|c| last_resolved.map_or(true, |resolved| c.committed_at > resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fullness::tests::{container, t0};
    use crate::domain::fullness::Thresholds;
    use crate::models::ContainerKind;
    use chrono::Duration;

    fn building(id: i64) -> Building {
        Building {
            id,
            address: "Kronverksky 49".to_string(),
            precollected_mass: None,
            takeout_notified: false,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn section(id: i64) -> BuildingSection {
        BuildingSection {
            id,
            building_id: 1,
            num: id,
            takeout_notified: false,
            created_at: t0(),
        }
    }

    fn mass_condition(mass: i64) -> TakeoutCondition {
        TakeoutCondition {
            mass: Some(mass),
            ..Default::default()
        }
    }

    fn tracker(id: i64, kind: ContainerKind, ignore_reports: i64) -> FullnessTracker {
        FullnessTracker::new(
            container(id, kind),
            Vec::new(),
            Thresholds {
                ignore_reports,
                max_days: None,
            },
        )
    }

    fn flat_building(condition: TakeoutCondition, trackers: Vec<FullnessTracker>) -> BuildingScope {
        BuildingScope {
            building: building(1),
            condition: Some(condition),
            sections: Vec::new(),
            unsectioned: trackers,
        }
    }

    #[test]
    fn mass_threshold_is_strict() {
        let mut scope =
            flat_building(mass_condition(45), vec![tracker(1, ContainerKind::Ecobox, 0)]);
        scope.unsectioned[0].add_full_report(false, t0()).unwrap();

        assert_eq!(scope.current_mass(), 45);
        assert!(!scope.meets_mass_condition());
        assert!(!scope.needs_takeout(t0()));
        assert_eq!(
            scope.mass_rule_trigger(scope.unsectioned[0].container()),
            MassRuleTrigger::None
        );

        scope.condition = Some(mass_condition(44));
        assert!(scope.meets_mass_condition());
        assert_eq!(
            scope.mass_rule_trigger(scope.unsectioned[0].container()),
            MassRuleTrigger::Building(1)
        );
    }

    #[test]
    fn unconfigured_rules_never_trigger() {
        let mut scope = flat_building(
            TakeoutCondition::default(),
            vec![tracker(1, ContainerKind::Ecobox, 0)],
        );
        scope.unsectioned[0].add_full_report(false, t0()).unwrap();
        assert!(!scope.meets_mass_condition());
        assert!(!scope.needs_takeout(t0() + Duration::days(365)));
        assert_eq!(scope.containers_for_takeout().len(), 1);
    }

    #[test]
    fn public_reports_below_threshold_add_no_mass() {
        let mut scope = flat_building(
            mass_condition(45),
            vec![
                tracker(1, ContainerKind::PublicEcobox, 1),
                tracker(2, ContainerKind::Ecobox, 0),
            ],
        );
        scope.unsectioned[0].add_full_report(false, t0()).unwrap();
        scope.unsectioned[1].add_full_report(false, t0()).unwrap();
        assert!(!scope.needs_takeout(t0()));
        assert_eq!(scope.containers_for_takeout().len(), 1);

        scope.unsectioned[0].add_full_report(false, t0()).unwrap();
        assert_eq!(scope.current_mass(), 60);
        assert!(scope.needs_takeout(t0()));
        assert_eq!(scope.takeout_reasons(t0()), vec![TakeoutReason::Mass]);
    }

    #[test]
    fn section_breach_surfaces_on_building() {
        let mut office = tracker(1, ContainerKind::OfficeBox, 0);
        let mut public = tracker(2, ContainerKind::PublicEcobox, 1);
        office.add_full_report(false, t0()).unwrap();

        let mut scope = BuildingScope {
            building: building(1),
            condition: None,
            sections: vec![SectionScope {
                section: section(7),
                condition: Some(mass_condition(30)),
                trackers: Vec::new(),
            }],
            unsectioned: Vec::new(),
        };
        scope.sections[0].trackers.push(office.clone());
        assert!(!scope.sections[0].meets_mass_condition());

        public.add_full_report(false, t0()).unwrap();
        public.add_full_report(false, t0()).unwrap();
        scope.sections[0].trackers.push(public);

        assert_eq!(scope.sections[0].current_mass(), 35);
        assert!(scope.sections[0].needs_takeout(t0()));
        assert!(scope.needs_takeout(t0()));
        assert_eq!(scope.current_mass(), 35);

        let mut in_section = office.container().clone();
        in_section.section_id = Some(7);
        assert_eq!(scope.mass_rule_trigger(&in_section), MassRuleTrigger::Section(7));
        assert_eq!(scope.notify_scopes().len(), 1);
        assert_eq!(scope.notify_scopes()[0].section_id(), Some(7));
    }

    #[test]
    fn time_condition_reports_reason() {
        let mut t = FullnessTracker::new(
            container(1, ContainerKind::OfficeBox),
            Vec::new(),
            Thresholds {
                ignore_reports: 0,
                max_days: Some(3),
            },
        );
        t.add_full_report(false, t0()).unwrap();
        let scope = flat_building(TakeoutCondition::default(), vec![t]);

        assert!(!scope.meets_time_condition(t0() + Duration::days(2)));
        assert_eq!(
            scope.takeout_reasons(t0() + Duration::days(3)),
            vec![TakeoutReason::Time]
        );
    }

    #[test]
    fn committed_mass_leaves_only_time_to_announce() {
        let mut t = FullnessTracker::new(
            container(1, ContainerKind::Ecobox),
            Vec::new(),
            Thresholds {
                ignore_reports: 0,
                max_days: Some(1),
            },
        );
        t.add_full_report(false, t0()).unwrap();
        let scope = flat_building(mass_condition(40), vec![t]);
        let commit = MassRuleCommit {
            id: 1,
            building_id: 1,
            section_id: None,
            committed_at: t0(),
        };

        let fresh = ScopeRef::Building(&scope)
            .notify_decision(&[], &[], t0())
            .unwrap();
        assert!(fresh.commit_mass);
        assert_eq!(fresh.reasons, vec![TakeoutReason::Mass]);
        assert_eq!(fresh.container_ids, vec![1]);

        let committed = [commit];
        assert_eq!(ScopeRef::Building(&scope).notify_decision(&committed, &[], t0()), None);

        let later = ScopeRef::Building(&scope)
            .notify_decision(&committed, &[], t0() + Duration::days(1))
            .unwrap();
        assert!(!later.commit_mass);
        assert_eq!(later.reasons, vec![TakeoutReason::Time]);
    }

    #[test]
    fn mass_commit_rearms_only_after_resolving_pickup() {
        let commit = MassRuleCommit {
            id: 1,
            building_id: 1,
            section_id: None,
            committed_at: t0(),
        };
        let mut takeout = ContainersTakeoutRequest {
            id: 1,
            building_id: 1,
            section_id: None,
            container_ids: vec![1, 2],
            emptied_container_ids: vec![1],
            worker_info: String::new(),
            resolved_scope: false,
            created_at: t0(),
            confirmed_at: Some(t0() + Duration::hours(1)),
        };

        assert!(!is_mass_condition_committed(1, None, &[], &[]));
        assert!(is_mass_condition_committed(1, None, &[commit.clone()], &[]));
        assert!(is_mass_condition_committed(
            1,
            None,
            &[commit.clone()],
            &[takeout.clone()]
        ));

        takeout.resolved_scope = true;
        assert!(!is_mass_condition_committed(1, None, &[commit.clone()], &[takeout]));
        assert!(!is_mass_condition_committed(1, Some(3), &[commit], &[]));
    }
}
