//! `Registration`: a .eth second-level registration.

use crate::services::graphql::orm::{EntityDef, ForeignKey, Nullability, ScalarKind};

use Nullability::{Optional, Required};

pub fn definition() -> EntityDef {
    EntityDef::new("Registration", "registrations")
        .field("id", "id", ScalarKind::String, Required)
        .field("registrationDate", "registration_date", ScalarKind::BigInt, Required)
        .field("expiryDate", "expiry_date", ScalarKind::BigInt, Required)
        .field("cost", "cost", ScalarKind::BigInt, Optional)
        .field("labelName", "label_name", ScalarKind::String, Optional)
        .to_one("domain", "Domain", ForeignKey::Parent("domain_id".into()), Required)
        .to_one("registrant", "Account", ForeignKey::Parent("registrant_id".into()), Required)
}
