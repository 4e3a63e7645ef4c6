//! `Account`: an Ethereum address that owns names.

use crate::services::graphql::orm::{EntityDef, Nullability, ScalarKind};

pub fn definition() -> EntityDef {
    EntityDef::new("Account", "accounts")
        .field("id", "id", ScalarKind::String, Nullability::Required)
        .to_many("domains", "Domain", "owner_id")
        .to_many("wrappedDomains", "WrappedDomain", "owner_id")
        .to_many("registrations", "Registration", "registrant_id")
}
