//! Field and method descriptor parsing.

use super::{FormatError, FormatResult};

/// A parsed method descriptor, keeping field descriptors as strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter field descriptors in declaration order
    pub params: Vec<String>,
    /// Return field descriptor, `None` for `V`
    pub ret: Option<String>,
}

impl MethodDescriptor {
    /// Parse `(params)ret`
    pub fn parse(descriptor: &str) -> FormatResult<Self> {
        let rest = descriptor
            .strip_prefix('(')
            .ok_or_else(|| invalid(descriptor))?;
        let close = rest.find(')').ok_or_else(|| invalid(descriptor))?;
        let (mut params_src, ret_src) = (&rest[..close], &rest[close + 1..]);

        let mut params = Vec::new();
        while !params_src.is_empty() {
            let len = field_len(params_src).ok_or_else(|| invalid(descriptor))?;
            params.push(params_src[..len].to_string());
            params_src = &params_src[len..];
        }

        let ret = if ret_src == "V" {
            None
        } else if field_len(ret_src) == Some(ret_src.len()) {
            Some(ret_src.to_string())
        } else {
            return Err(invalid(descriptor));
        };
        Ok(Self { params, ret })
    }

    /// Total local variable slots taken by the parameters
    #[must_use]
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| slot_size(p)).sum()
    }
}

/// Slots one value of the given field descriptor occupies (2 for `J`/`D`)
#[must_use]
pub fn slot_size(field: &str) -> u16 {
    match field.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}

/// Length of the first field descriptor at the start of `s`
fn field_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        b'L' => s[i..].find(';').map(|semi| i + semi + 1),
        _ => None,
    }
}

fn invalid(descriptor: &str) -> FormatError {
    FormatError::new(format!("invalid method descriptor {descriptor}"))
}
