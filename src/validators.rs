//! Input validation and sanitization functions for YARP
//!
//! Small, pure checks shared by the document validator and rule generation.
//! Each returns `Err(String)` with an operator-facing message; the caller adds
//! the document location.

/// Sanitizes a label for safe use in iptables comments.
///
/// Removes control characters, quotes, and shell metacharacters.
/// Limits length to 64 bytes (ASCII characters only).
///
/// # Examples
///
/// ```
/// use yarp::validators::sanitize_label;
///
/// let safe = sanitize_label("web servers");
/// assert_eq!(safe, "web servers");
///
/// let unsafe_label = "Test\nNewline\"Quote";
/// let safe = sanitize_label(unsafe_label);
/// assert!(!safe.contains('\n'));
/// assert!(!safe.contains('"'));
/// ```
pub fn sanitize_label(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ':'))
        .take(64)
        .collect()
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be empty, "." or ".."
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Interface name cannot be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(())
}

/// Validates a DNS domain: dot-separated labels of ASCII letters and digits,
/// hyphens allowed inside a label but not at either end.
///
/// # Errors
///
/// Returns `Err` naming the first offending label.
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("Domain cannot be empty".to_string());
    }

    if domain.len() > 253 {
        return Err("Domain too long (max 253 characters)".to_string());
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err("Domain contains an empty label".to_string());
        }
        if label.len() > 63 {
            return Err(format!("Label '{label}' too long (max 63 characters)"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("Label '{label}' cannot start or end with a hyphen"));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("Label '{label}' contains invalid characters"));
        }
    }

    Ok(())
}

/// Validates a tz database name of the form `Area/City` or `Area/City/Subcity`.
///
/// # Errors
///
/// Returns `Err` if the name has the wrong number of parts or a part is malformed.
pub fn validate_timezone(tz: &str) -> Result<(), String> {
    let parts: Vec<&str> = tz.split('/').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err("Timezone must look like Area/City or Area/City/Subcity".to_string());
    }

    for part in parts {
        let mut chars = part.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        if !starts_with_letter
            || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        {
            return Err(format!("Timezone component '{part}' is malformed"));
        }
    }

    Ok(())
}

/// Returns `true` for IPv4 link-local (169.254.0.0/16) addresses.
///
/// Such an address does not count as a DHCP lease.
pub fn is_link_local_v4(addr: std::net::Ipv4Addr) -> bool {
    addr.is_link_local()
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_sanitize_label_never_exceeds_64_chars(input in "\\PC*") {
            let sanitized = sanitize_label(&input);
            prop_assert!(sanitized.len() <= 64);
        }

        #[test]
        fn test_sanitize_label_no_dangerous_chars(input in "\\PC*") {
            let sanitized = sanitize_label(&input);
            prop_assert!(!sanitized.chars().any(char::is_control));
            prop_assert!(!sanitized.contains('"'));
            prop_assert!(!sanitized.contains('\''));
            prop_assert!(!sanitized.contains('*'));
            prop_assert!(!sanitized.contains('/'));
        }

        #[test]
        fn test_validate_port_range_consistency(
            start in 1u16..=65535,
            end in 1u16..=65535
        ) {
            let result = validate_port_range(start, end);
            if start <= end {
                prop_assert_eq!(result, Ok((start, end)));
            } else {
                prop_assert!(result.is_err());
            }
        }

        #[test]
        fn test_validate_interface_length_constraint(name in "[a-zA-Z0-9_-]{1,20}") {
            let result = validate_interface(&name);
            prop_assert_eq!(result.is_ok(), name.len() <= 15);
        }

        #[test]
        fn test_validate_domain_accepts_generated_names(
            labels in proptest::collection::vec("[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?", 1..5)
        ) {
            let domain = labels.join(".");
            prop_assert!(validate_domain(&domain).is_ok());
        }
    }
}
