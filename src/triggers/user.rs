use async_trait::async_trait;

use super::{BeforeSaveTrigger, Trigger, TriggerContext, TriggerError};
use crate::acl::{implement_acl, AclOptions};

/// New users are readable and writable by SuperAdmin and themselves only.
pub struct UserAcl;

impl Trigger for UserAcl {
    fn name(&self) -> &'static str {
        "user_acl"
    }

    fn class_name(&self) -> &'static str {
        "_User"
    }
}

#[async_trait]
impl BeforeSaveTrigger for UserAcl {
    async fn execute(&self, ctx: &mut TriggerContext) -> Result<(), TriggerError> {
        if !ctx.is_new() {
            return Ok(());
        }
        let user_id = ctx
            .object_id
            .clone()
            .ok_or_else(|| TriggerError::failed(self.name(), "object id was not allocated"))?;
        ctx.acl = Some(implement_acl(
            &AclOptions::default()
                .role("SuperAdmin", true, true)
                .owner(&user_id, true, true),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;

    #[tokio::test]
    async fn new_users_get_owner_acl() {
        let mut ctx = TriggerContext::new("_User", Document::new());
        ctx.object_id = Some("u1".to_string());
        UserAcl.execute(&mut ctx).await.unwrap();

        let acl = ctx.acl.unwrap();
        assert!(acl.can_write(Some("u1"), &[]));
        assert!(acl.can_write(Some("other"), &["SuperAdmin".to_string()]));
        assert!(!acl.can_read(Some("other"), &["Parent".to_string()]));
    }
}
