pub mod org_id;

pub use org_id::OrgId;
