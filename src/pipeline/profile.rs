//! Collection profile: which categories of unit data to fetch.
//!
//! The profile is declarative. Each toggle adds one list section to the
//! Collect stage, and therefore one or more scheduled calls per unit.
//! The four core toggles must be stated explicitly when a profile is
//! loaded from a file; leaving one out is a configuration error caught by
//! [`CollectionProfile::validate`] before any request is issued.

use serde::{Deserialize, Serialize};

use crate::api::ApiRequest;
use crate::error::{LmsflowError, Result};
use crate::scheduler::Priority;

/// Named sections of a collected document.
pub const SECTION_DETAILS: &str = "details";
pub const SECTION_STUDENTS: &str = "students";
pub const SECTION_ASSIGNMENTS: &str = "assignments";
pub const SECTION_SUBMISSIONS: &str = "submissions";
pub const SECTION_MODULES: &str = "modules";
pub const SECTION_ENROLLMENTS: &str = "enrollments";
pub const SECTION_ANNOUNCEMENTS: &str = "announcements";

/// One request family in the Collect stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: &'static str,
    pub request: ApiRequest,
    pub priority: Priority,
    /// List endpoints are fetched page by page.
    pub paginated: bool,
}

impl Section {
    fn single(name: &'static str, request: ApiRequest, priority: Priority) -> Self {
        Self {
            name,
            request,
            priority,
            paginated: false,
        }
    }

    fn list(name: &'static str, request: ApiRequest, priority: Priority) -> Self {
        Self {
            name,
            request,
            priority,
            paginated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProfile {
    #[serde(default)]
    pub students: Option<bool>,
    #[serde(default)]
    pub assignments: Option<bool>,
    #[serde(default)]
    pub submissions: Option<bool>,
    #[serde(default)]
    pub modules: Option<bool>,
    #[serde(default)]
    pub enrollments: bool,
    #[serde(default)]
    pub announcements: bool,
}

impl Default for CollectionProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl CollectionProfile {
    /// Roster, coursework and modules; no submissions.
    pub fn standard() -> Self {
        Self {
            students: Some(true),
            assignments: Some(true),
            submissions: Some(false),
            modules: Some(true),
            enrollments: false,
            announcements: false,
        }
    }

    /// Unit details only.
    pub fn minimal() -> Self {
        Self {
            students: Some(false),
            assignments: Some(false),
            submissions: Some(false),
            modules: Some(false),
            enrollments: false,
            announcements: false,
        }
    }

    /// Every section.
    pub fn full() -> Self {
        Self {
            students: Some(true),
            assignments: Some(true),
            submissions: Some(true),
            modules: Some(true),
            enrollments: true,
            announcements: true,
        }
    }

    /// Reject profiles with unset core toggles or inconsistent selections.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            (SECTION_STUDENTS, self.students),
            (SECTION_ASSIGNMENTS, self.assignments),
            (SECTION_SUBMISSIONS, self.submissions),
            (SECTION_MODULES, self.modules),
        ]
        .iter()
        .filter(|(_, toggle)| toggle.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(LmsflowError::Config(format!(
                "collection profile is missing required toggle(s): {}",
                missing.join(", ")
            )));
        }

        if self.submissions == Some(true) && self.assignments != Some(true) {
            return Err(LmsflowError::Config(
                "collection profile: submissions requires assignments".to_string(),
            ));
        }

        Ok(())
    }

    /// Names of the sections this profile collects, details first.
    pub fn section_names(&self) -> Vec<&'static str> {
        self.sections(0).iter().map(|s| s.name).collect()
    }

    /// Requests for one unit. Unset toggles count as off.
    pub fn sections(&self, unit_id: u64) -> Vec<Section> {
        let base = format!("/courses/{}", unit_id);
        let on = |toggle: Option<bool>| toggle.unwrap_or(false);

        let mut sections = vec![Section::single(
            SECTION_DETAILS,
            ApiRequest::new(&base)
                .param("include[]", "term")
                .param("include[]", "total_students"),
            Priority::High,
        )];

        if on(self.students) {
            sections.push(Section::list(
                SECTION_STUDENTS,
                ApiRequest::new(format!("{}/users", base))
                    .param("enrollment_type[]", "student")
                    .param("include[]", "email"),
                Priority::Medium,
            ));
        }
        if on(self.assignments) {
            sections.push(Section::list(
                SECTION_ASSIGNMENTS,
                ApiRequest::new(format!("{}/assignments", base)),
                Priority::Medium,
            ));
        }
        if on(self.submissions) {
            sections.push(Section::list(
                SECTION_SUBMISSIONS,
                ApiRequest::new(format!("{}/students/submissions", base)).param("student_ids[]", "all"),
                Priority::Low,
            ));
        }
        if on(self.modules) {
            sections.push(Section::list(
                SECTION_MODULES,
                ApiRequest::new(format!("{}/modules", base)).param("include[]", "items"),
                Priority::Medium,
            ));
        }
        if self.enrollments {
            sections.push(Section::list(
                SECTION_ENROLLMENTS,
                ApiRequest::new(format!("{}/enrollments", base)),
                Priority::Medium,
            ));
        }
        if self.announcements {
            sections.push(Section::list(
                SECTION_ANNOUNCEMENTS,
                ApiRequest::new("/announcements").param("context_codes[]", format!("course_{}", unit_id)),
                Priority::Low,
            ));
        }

        sections
    }
}
