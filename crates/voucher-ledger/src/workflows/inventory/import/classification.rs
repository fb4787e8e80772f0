use crate::workflows::domain::ServiceCode;

/// Provider-specific rule deriving a resource's service code from its code prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationRule {
    prefixes: Vec<(String, ServiceCode)>,
}

impl ClassificationRule {
    pub fn new(prefixes: &[(&str, ServiceCode)]) -> Self {
        let mut prefixes: Vec<(String, ServiceCode)> = prefixes
            .iter()
            .map(|(prefix, code)| (prefix.to_ascii_uppercase(), *code))
            .collect();
        // longest prefix wins when two rules overlap
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { prefixes }
    }

    pub fn classify(&self, code: &str) -> Option<ServiceCode> {
        let upper = code.to_ascii_uppercase();
        self.prefixes
            .iter()
            .find(|(prefix, _)| upper.starts_with(prefix.as_str()))
            .map(|(_, service_code)| *service_code)
    }
}
