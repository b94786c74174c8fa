use std::collections::HashMap;

use crate::error::Error;

/// The value(s) given for one form key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// The key appeared once.
    Single(String),

    /// The key appeared several times, values in order of appearance.
    List(Vec<String>),
}

impl FormValue {
    fn push(&mut self, value: String) {
        match self {
            FormValue::Single(first) => {
                *self = FormValue::List(vec![std::mem::take(first), value]);
            }
            FormValue::List(values) => values.push(value),
        }
    }
}

/// A decoded `application/x-www-form-urlencoded` body or query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form(HashMap<String, FormValue>);

impl Form {
    /// Decode `key=value` pairs separated by `&`.
    ///
    /// Both sides are percent-decoded and `+` means space.
    /// A key without `=` gets an empty value.
    pub fn parse(input: &[u8]) -> Self {
        let mut fields: HashMap<String, FormValue> = HashMap::new();

        for (key, value) in url::form_urlencoded::parse(input) {
            let value = value.into_owned();

            match fields.get_mut(key.as_ref()) {
                Some(existing) => existing.push(value),
                None => {
                    fields.insert(key.into_owned(), FormValue::Single(value));
                }
            }
        }

        Self(fields)
    }

    /// All values of a key.
    pub fn get(&self, key: &str) -> Option<&FormValue> {
        self.0.get(key)
    }

    /// The single value of a key.
    /// Missing keys and repeated keys are both errors.
    pub fn value(&self, key: &str) -> Result<&str, Error> {
        match self.0.get(key) {
            Some(FormValue::Single(value)) => Ok(value),
            Some(FormValue::List(values)) => Err(Error::BadForm {
                key: key.into(),
                problem: format!("given {} times", values.len()),
            }),
            None => Err(Error::BadForm {
                key: key.into(),
                problem: "missing".into(),
            }),
        }
    }

    /// The single value of a key, parsed.
    pub fn parse_value<T>(&self, key: &str) -> Result<T, Error>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.value(key)?;

        value.parse().map_err(|e| Error::BadForm {
            key: key.into(),
            problem: format!("`{value}`: {e}"),
        })
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No keys at all?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
