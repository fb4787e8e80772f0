//! Built-in voucher providers: their pools, code-prefix rules and follow-up policies.

use std::sync::Arc;

use crate::workflows::directory::ProviderProfile;
use crate::workflows::domain::{ProviderId, ServiceCode};
use crate::workflows::lifecycle::{
    FollowUpOutcome, FollowUpPolicy, LifecycleEvent, NewTaskAssignment, TaskService,
    TaskServiceError,
};

pub const ACCREDIT: &str = "accredit";
pub const LANGCERT: &str = "langcert";

pub const SCHEDULE_EXAM: &str = "schedule_exam";
pub const RECORD_EXAM_RESULT: &str = "record_exam_result";
pub const REQUEST_REPLACEMENT_VOUCHER: &str = "request_replacement_voucher";
pub const BOOK_LANGUAGE_TEST: &str = "book_language_test";

pub const VOUCHER_ISSUED_TEMPLATE: &str = "voucher_issued";

/// Certification exam vouchers, proctored or not.
#[derive(Debug, Default)]
pub struct AccreditPolicy;

impl FollowUpPolicy for AccreditPolicy {
    fn provider(&self) -> ProviderId {
        ProviderId::new(ACCREDIT)
    }

    fn tasks_on_assigned(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![SCHEDULE_EXAM.to_string()]
    }

    fn tasks_on_redeemed(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![RECORD_EXAM_RESULT.to_string()]
    }

    fn tasks_on_reassigned(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![SCHEDULE_EXAM.to_string()]
    }

    fn tasks_on_expired(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![REQUEST_REPLACEMENT_VOUCHER.to_string()]
    }

    fn notification_on_assigned(&self) -> Option<&str> {
        Some(VOUCHER_ISSUED_TEMPLATE)
    }

    /// Retires open scheduling tasks, then raises the replacement request.
    fn handle_expired(
        &self,
        event: &LifecycleEvent,
        tasks: &dyn TaskService,
    ) -> Result<FollowUpOutcome, TaskServiceError> {
        let candidate = &event.assignment.candidate_id;
        let mut outcome = FollowUpOutcome::default();

        let reason = format!("voucher {} expired", event.assignment.resource_code);
        for stale in tasks.find_active(candidate, SCHEDULE_EXAM)? {
            tasks.retire(stale.id, &reason, event.actor.as_ref())?;
            outcome.retired.push(stale.id);
        }

        for task_name in self.tasks_on_expired(event) {
            let created = tasks.create(NewTaskAssignment {
                candidate_id: candidate.clone(),
                task_name,
                source_assignment: event.assignment.id,
            })?;
            outcome.created.push(created.id);
        }

        Ok(outcome)
    }
}

/// Language proficiency test vouchers.
#[derive(Debug, Default)]
pub struct LangCertPolicy;

impl FollowUpPolicy for LangCertPolicy {
    fn provider(&self) -> ProviderId {
        ProviderId::new(LANGCERT)
    }

    fn tasks_on_assigned(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![BOOK_LANGUAGE_TEST.to_string()]
    }

    fn tasks_on_reassigned(&self, _event: &LifecycleEvent) -> Vec<String> {
        vec![BOOK_LANGUAGE_TEST.to_string()]
    }
}

pub fn accredit_profile() -> ProviderProfile {
    ProviderProfile::new(
        ACCREDIT,
        &[ServiceCode::Proctored, ServiceCode::NonProctored],
        &[
            ("ACC", ServiceCode::Proctored),
            ("NONP", ServiceCode::NonProctored),
        ],
    )
}

pub fn langcert_profile() -> ProviderProfile {
    ProviderProfile::new(
        LANGCERT,
        &[ServiceCode::Speaking, ServiceCode::Writing],
        &[("LCS", ServiceCode::Speaking), ("LCW", ServiceCode::Writing)],
    )
}

/// Profiles and policies for every provider the process knows about.
#[derive(Clone)]
pub struct ProviderCatalogue {
    pub profiles: Vec<ProviderProfile>,
    pub policies: Vec<Arc<dyn FollowUpPolicy>>,
}

impl ProviderCatalogue {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![accredit_profile(), langcert_profile()],
            policies: vec![Arc::new(AccreditPolicy), Arc::new(LangCertPolicy)],
        }
    }

    pub fn with_provider(
        mut self,
        profile: ProviderProfile,
        policy: Arc<dyn FollowUpPolicy>,
    ) -> Self {
        self.profiles.push(profile);
        self.policies.push(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules_match_the_declared_service_codes() {
        let accredit = accredit_profile();
        assert_eq!(
            accredit.classification.classify("NONP-991"),
            Some(ServiceCode::NonProctored)
        );
        assert_eq!(
            accredit.classification.classify("acc-12"),
            Some(ServiceCode::Proctored)
        );

        let langcert = langcert_profile();
        assert_eq!(langcert.classification.classify("LCW7"), Some(ServiceCode::Writing));
        assert_eq!(langcert.classification.classify("ACC1"), None);
    }

    #[test]
    fn builtin_catalogue_pairs_each_profile_with_a_policy() {
        let catalogue = ProviderCatalogue::builtin();
        let mut from_profiles: Vec<_> = catalogue
            .profiles
            .iter()
            .map(|profile| profile.provider.clone())
            .collect();
        let mut from_policies: Vec<_> = catalogue
            .policies
            .iter()
            .map(|policy| policy.provider())
            .collect();
        from_profiles.sort();
        from_policies.sort();
        assert_eq!(from_profiles, from_policies);
    }
}
