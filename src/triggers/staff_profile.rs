use async_trait::async_trait;

use super::{BeforeSaveTrigger, Trigger, TriggerContext, TriggerError};
use crate::acl::{implement_acl, AclOptions};

/// Staff profiles without an explicit ACL belong to their creator and the Admin role.
pub struct StaffProfileAcl;

impl Trigger for StaffProfileAcl {
    fn name(&self) -> &'static str {
        "staff_profile_acl"
    }

    fn class_name(&self) -> &'static str {
        "StaffProfile"
    }
}

#[async_trait]
impl BeforeSaveTrigger for StaffProfileAcl {
    async fn execute(&self, ctx: &mut TriggerContext) -> Result<(), TriggerError> {
        if ctx.acl.as_ref().map_or(false, |acl| !acl.is_empty()) {
            return Ok(());
        }
        let mut options = AclOptions::default().role("Admin", true, true);
        if let Some(user_id) = &ctx.user_id {
            options = options.owner(user_id, true, true);
        }
        ctx.acl = Some(implement_acl(&options));
        Ok(())
    }
}
