//! `WrappedDomain`: a name held by the name wrapper.

use crate::services::graphql::orm::{EntityDef, ForeignKey, Nullability, ScalarKind};

use Nullability::{Optional, Required};

pub fn definition() -> EntityDef {
    EntityDef::new("WrappedDomain", "wrapped_domains")
        .field("id", "id", ScalarKind::String, Required)
        .field("expiryDate", "expiry_date", ScalarKind::BigInt, Required)
        .field("fuses", "fuses", ScalarKind::Int, Required)
        .field("name", "name", ScalarKind::String, Optional)
        .to_one("domain", "Domain", ForeignKey::Parent("domain_id".into()), Required)
        .to_one("owner", "Account", ForeignKey::Parent("owner_id".into()), Required)
}
