//! `Domain`: a node of the ENS name tree.

use crate::services::graphql::orm::{EntityDef, ForeignKey, Nullability, ScalarKind};

use Nullability::{Optional, Required};

pub fn definition() -> EntityDef {
    EntityDef::new("Domain", "domains")
        .field("id", "id", ScalarKind::String, Required)
        .field("name", "name", ScalarKind::String, Optional)
        .field("labelName", "label_name", ScalarKind::String, Optional)
        .field("labelhash", "labelhash", ScalarKind::Bytes, Optional)
        .field("subdomainCount", "subdomain_count", ScalarKind::Int, Required)
        .field("ttl", "ttl", ScalarKind::BigInt, Optional)
        .field("isMigrated", "is_migrated", ScalarKind::Boolean, Required)
        .field("createdAt", "created_at", ScalarKind::BigInt, Required)
        .field("expiryDate", "expiry_date", ScalarKind::BigInt, Optional)
        .to_one("parent", "Domain", ForeignKey::Parent("parent_id".into()), Optional)
        .to_many("subdomains", "Domain", "parent_id")
        .to_one(
            "resolvedAddress",
            "Account",
            ForeignKey::Parent("resolved_address_id".into()),
            Optional,
        )
        .to_one("resolver", "Resolver", ForeignKey::Parent("resolver_id".into()), Optional)
        .to_one("owner", "Account", ForeignKey::Parent("owner_id".into()), Required)
        .to_one("registrant", "Account", ForeignKey::Parent("registrant_id".into()), Optional)
        .to_one(
            "wrappedOwner",
            "Account",
            ForeignKey::Parent("wrapped_owner_id".into()),
            Optional,
        )
        // at most one registration / wrapper per domain, keyed on their side
        .to_one("registration", "Registration", ForeignKey::Target("domain_id".into()), Optional)
        .to_one("wrappedDomain", "WrappedDomain", ForeignKey::Target("domain_id".into()), Optional)
}
