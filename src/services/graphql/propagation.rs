//! Null propagation for failed fields.
//!
//! A failing resolver reports its error at its own path and resolves to null.
//! When the field is non-null that null belongs to the nearest nullable
//! ancestor instead, and the resolver records that position here.
//! [NullTargets::apply] writes those nulls into the response once execution
//! has finished.

use async_graphql::{Name, PathSegment, Response, ServerError, Value};
use parking_lot::Mutex;

/// Response position that must become null. `None` is `data` itself.
pub type NullTarget = Option<Vec<PathSegment>>;

#[derive(Debug, Default)]
pub struct NullTargets {
    targets: Mutex<Vec<NullTarget>>,
}

impl NullTargets {
    pub fn push(&self, target: NullTarget) {
        self.targets.lock().push(target);
    }

    /// Null out every recorded position.
    ///
    /// The executor reports its own "non-null types require a return value"
    /// error for each failed non-null field; those are dropped where a coded
    /// error already sits at the same path.
    pub fn apply(&self, response: &mut Response) {
        let targets = std::mem::take(&mut *self.targets.lock());
        for target in targets {
            match target {
                None => response.data = Value::Null,
                Some(path) => set_null(&mut response.data, &path),
            }
        }

        let reported: Vec<Vec<PathSegment>> = response
            .errors
            .iter()
            .filter(|error| has_code(error))
            .map(|error| error.path.clone())
            .collect();
        response
            .errors
            .retain(|error| has_code(error) || !reported.contains(&error.path));
    }
}

pub fn has_code(error: &ServerError) -> bool {
    error
        .extensions
        .as_ref()
        .is_some_and(|extensions| extensions.get("code").is_some())
}

fn set_null(data: &mut Value, path: &[PathSegment]) {
    let Some((last, parents)) = path.split_last() else {
        *data = Value::Null;
        return;
    };

    let mut current = data;
    for segment in parents {
        current = match (segment, current) {
            (PathSegment::Field(key), Value::Object(map)) => match map.get_mut(key.as_str()) {
                Some(value) => value,
                None => return,
            },
            (PathSegment::Index(index), Value::List(items)) => match items.get_mut(*index) {
                Some(value) => value,
                None => return,
            },
            // an ancestor is already null
            _ => return,
        };
    }

    match (last, current) {
        (PathSegment::Field(key), Value::Object(map)) => {
            map.insert(Name::new(key), Value::Null);
        }
        (PathSegment::Index(index), Value::List(items)) => {
            if let Some(item) = items.get_mut(*index) {
                *item = Value::Null;
            }
        }
        _ => {}
    }
}
