use thiserror::Error;

/// Invariant violations raised by the department aggregate rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepartmentRuleError {
    #[error("department name must not be blank")]
    BlankName,
    #[error("department still has {0} employee(s) assigned")]
    HasEmployees(i64),
    #[error("cursor pagination only supports ordering by created_at ascending (got {0})")]
    UnsupportedSort(String),
}

/// Validates a department name prior to create or rename.
///
/// Uniqueness is not checked here: that requires the store and is enforced by
/// its unique index so concurrent writers race safely.
pub fn validate_name(name: &str) -> Result<(), DepartmentRuleError> {
    if name.trim().is_empty() {
        return Err(DepartmentRuleError::BlankName);
    }
    Ok(())
}

/// A department may only be deleted while no employee references it.
/// Deletion is blocked, never cascaded.
pub fn ensure_deletable(employee_count: i64) -> Result<(), DepartmentRuleError> {
    if employee_count > 0 {
        return Err(DepartmentRuleError::HasEmployees(employee_count));
    }
    Ok(())
}

/// Normalizes listing search text: trimmed, and dropped entirely when blank.
pub fn normalize_search(search: Option<&str>) -> Option<String> {
    let trimmed = search?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Rejects listing sort parameters the cursor cannot honor.
///
/// The cursor is a (created_at, id) key, so it is only meaningful for the
/// default ascending created_at order. Rather than silently reinterpreting
/// the cursor for another ordering, any other sort request is refused.
pub fn validate_sort(
    sort_field: Option<&str>,
    sort_direction: Option<&str>,
) -> Result<(), DepartmentRuleError> {
    if let Some(field) = sort_field {
        if field != "created_at" && field != "createdAt" {
            return Err(DepartmentRuleError::UnsupportedSort(field.to_string()));
        }
    }
    if let Some(direction) = sort_direction {
        if !direction.eq_ignore_ascii_case("asc") {
            return Err(DepartmentRuleError::UnsupportedSort(direction.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        assert_eq!(validate_name("   "), Err(DepartmentRuleError::BlankName));
        assert_eq!(validate_name(""), Err(DepartmentRuleError::BlankName));
        assert_eq!(validate_name("Engineering"), Ok(()));
    }

    #[test]
    fn occupied_departments_cannot_be_deleted() {
        assert_eq!(ensure_deletable(0), Ok(()));
        assert_eq!(ensure_deletable(3), Err(DepartmentRuleError::HasEmployees(3)));
    }

    #[test]
    fn search_text_is_trimmed_and_blank_is_dropped() {
        assert_eq!(normalize_search(None), None);
        assert_eq!(normalize_search(Some("   ")), None);
        assert_eq!(normalize_search(Some("  sales ")), Some("sales".to_string()));
    }

    #[test]
    fn only_created_at_ascending_is_sortable() {
        assert_eq!(validate_sort(None, None), Ok(()));
        assert_eq!(validate_sort(Some("created_at"), Some("asc")), Ok(()));
        assert_eq!(validate_sort(Some("createdAt"), Some("ASC")), Ok(()));
        assert_eq!(
            validate_sort(Some("name"), None),
            Err(DepartmentRuleError::UnsupportedSort("name".to_string()))
        );
        assert_eq!(
            validate_sort(None, Some("desc")),
            Err(DepartmentRuleError::UnsupportedSort("desc".to_string()))
        );
    }
}
