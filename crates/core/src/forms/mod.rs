//! Per-type descriptors for the four request forms. The engine never looks
//! inside a payload; these descriptors exist for intake, document naming and
//! bootstrap plans.

use std::collections::HashMap;

use crate::domain::form::FormPayload;
use crate::domain::request::{RequestId, RequestType};

pub const ROOT_UNIT: &str = "Academic and Student Services";
pub const RECORDS_UNIT: &str = "Identity and Records";
pub const ADVISING_UNIT: &str = "Advising";
pub const HEALTH_UNIT: &str = "Health and Wellness";

pub trait RequestForm: Send + Sync {
    fn request_type(&self) -> RequestType;

    fn display_name(&self) -> &'static str;

    /// File name prefix of the generated document, e.g. `drop_form_`.
    fn document_prefix(&self) -> &'static str;

    /// Keys the form always collects. Optional fields are not listed.
    fn payload_keys(&self) -> &'static [&'static str];

    /// Unit names, in step order, used when seeding the default plan.
    fn default_plan_units(&self) -> &'static [&'static str];

    fn edit_route(&self) -> &'static str;

    fn document_name(&self, request_id: &RequestId) -> String {
        let suffix = request_id.0.strip_prefix("REQ-").unwrap_or(&request_id.0);
        format!("{}{}.pdf", self.document_prefix(), suffix)
    }

    fn missing_keys(&self, payload: &FormPayload) -> Vec<&'static str> {
        self.payload_keys()
            .iter()
            .copied()
            .filter(|key| match payload.get(key) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(value)) => value.trim().is_empty(),
                Some(_) => false,
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FerpaForm;

impl RequestForm for FerpaForm {
    fn request_type(&self) -> RequestType {
        RequestType::Ferpa
    }

    fn display_name(&self) -> &'static str {
        "FERPA Release Authorization"
    }

    fn document_prefix(&self) -> &'static str {
        "ferpa_form_"
    }

    fn payload_keys(&self) -> &'static [&'static str] {
        &["NAME", "CAMPUS", "RELEASE", "PURPOSE", "ADDITIONALS", "PASSWORD", "PEOPLESOFT", "SIGNATURE", "DATE"]
    }

    fn default_plan_units(&self) -> &'static [&'static str] {
        &[RECORDS_UNIT, ROOT_UNIT]
    }

    fn edit_route(&self) -> &'static str {
        "edit-ferpa-request"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InfoChangeForm;

impl RequestForm for InfoChangeForm {
    fn request_type(&self) -> RequestType {
        RequestType::InfoChange
    }

    fn display_name(&self) -> &'static str {
        "Name / SSN Change"
    }

    fn document_prefix(&self) -> &'static str {
        "name_form_"
    }

    fn payload_keys(&self) -> &'static [&'static str] {
        &["NAME", "PEOPLESOFT", "EDIT_NAME", "EDIT_SSN", "SIGNATURE", "DATE"]
    }

    fn default_plan_units(&self) -> &'static [&'static str] {
        &[RECORDS_UNIT, ROOT_UNIT]
    }

    fn edit_route(&self) -> &'static str {
        "edit-infochange-request"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MedicalWithdrawalForm;

impl RequestForm for MedicalWithdrawalForm {
    fn request_type(&self) -> RequestType {
        RequestType::MedicalWithdrawal
    }

    fn display_name(&self) -> &'static str {
        "Medical Withdrawal"
    }

    fn document_prefix(&self) -> &'static str {
        "withdrawal_form_"
    }

    fn payload_keys(&self) -> &'static [&'static str] {
        &[
            "NAME",
            "PEOPLESOFT",
            "COLLEGE",
            "DEGREE",
            "ADDRESS",
            "CITY",
            "STATE",
            "ZIPCODE",
            "PHONE",
            "EMAIL",
            "TERMYEAR",
            "LASTATTENDED",
            "REASON",
            "SUBJECT",
            "NUMBER",
            "SECTION",
            "SIGNATURE",
            "INITIAL",
            "DATE",
        ]
    }

    fn default_plan_units(&self) -> &'static [&'static str] {
        &[HEALTH_UNIT, ROOT_UNIT]
    }

    fn edit_route(&self) -> &'static str {
        "edit-withdrawal-request"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StudentDropForm;

impl RequestForm for StudentDropForm {
    fn request_type(&self) -> RequestType {
        RequestType::StudentDrop
    }

    fn display_name(&self) -> &'static str {
        "Student Initiated Drop"
    }

    fn document_prefix(&self) -> &'static str {
        "drop_form_"
    }

    fn payload_keys(&self) -> &'static [&'static str] {
        &["NAME", "PEOPLESOFT", "BIRTHDATE", "TERMYEAR", "SUBJECT", "NUMBER", "SECTION", "SIGNATURE", "DATE"]
    }

    fn default_plan_units(&self) -> &'static [&'static str] {
        &[ADVISING_UNIT, ROOT_UNIT]
    }

    fn edit_route(&self) -> &'static str {
        "edit-drop-request"
    }
}

/// Lookup table from request type to its form descriptor.
pub struct FormRegistry {
    forms: HashMap<RequestType, Box<dyn RequestForm>>,
}

impl FormRegistry {
    pub fn standard() -> Self {
        let forms: [Box<dyn RequestForm>; 4] = [
            Box::new(FerpaForm),
            Box::new(InfoChangeForm),
            Box::new(MedicalWithdrawalForm),
            Box::new(StudentDropForm),
        ];
        Self { forms: forms.into_iter().map(|form| (form.request_type(), form)).collect() }
    }

    pub fn get(&self, request_type: RequestType) -> Option<&dyn RequestForm> {
        self.forms.get(&request_type).map(|form| form.as_ref())
    }

    /// Descriptors in `RequestType::ALL` order.
    pub fn forms(&self) -> impl Iterator<Item = &dyn RequestForm> {
        RequestType::ALL.into_iter().filter_map(move |request_type| self.get(request_type))
    }
}

impl Default for FormRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::{FormRegistry, ADVISING_UNIT, ROOT_UNIT};
    use crate::domain::form::FormPayload;
    use crate::domain::request::{RequestId, RequestType};

    #[test]
    fn every_request_type_has_a_descriptor() {
        let registry = FormRegistry::standard();

        for request_type in RequestType::ALL {
            let form = registry.get(request_type).expect("descriptor registered");
            assert_eq!(form.request_type(), request_type);
            assert!(form.document_prefix().ends_with("_form_"));
            assert!(!form.payload_keys().is_empty());
        }
        assert_eq!(registry.forms().count(), RequestType::ALL.len());
    }

    #[test]
    fn drop_form_routes_through_advising_by_default() {
        let registry = FormRegistry::standard();
        let form = registry.get(RequestType::StudentDrop).expect("drop form");

        assert_eq!(form.default_plan_units(), &[ADVISING_UNIT, ROOT_UNIT]);
        assert_eq!(form.edit_route(), "edit-drop-request");
    }

    #[test]
    fn document_name_uses_prefix_and_request_suffix() {
        let registry = FormRegistry::standard();
        let form = registry.get(RequestType::InfoChange).expect("info form");

        let name = form.document_name(&RequestId("REQ-4f1c".to_owned()));
        assert_eq!(name, "name_form_4f1c.pdf");
    }

    #[test]
    fn missing_keys_reports_absent_and_blank_fields() {
        let registry = FormRegistry::standard();
        let form = registry.get(RequestType::StudentDrop).expect("drop form");
        let payload = FormPayload::default()
            .with_field("NAME", "Ada King")
            .with_field("PEOPLESOFT", "123456")
            .with_field("BIRTHDATE", "2001-02-03")
            .with_field("TERMYEAR", "Fall 2026")
            .with_field("SUBJECT", "MATH")
            .with_field("NUMBER", "  ")
            .with_field("SECTION", "01")
            .with_field("DATE", "2026-10-01");

        assert_eq!(form.missing_keys(&payload), vec!["NUMBER", "SIGNATURE"]);
    }
}
