use projector_common::{Activity, PayloadKind};
use serde::{Deserialize, Serialize};

use super::ActivityHandler;
use crate::errors::HandlerError;
use crate::index::IndexTransaction;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub uuid: String,
    pub name: String,
}

pub struct Environments;

impl ActivityHandler for Environments {
    fn name(&self) -> &'static str {
        "environments"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &["environment.added", "environment.edited"]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        if !self.subscribed_to().contains(&activity.name.as_str()) {
            return Ok(());
        }
        let environment = activity
            .payload
            .as_environment()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Environment))?;

        tx.put(
            &environment.uuid,
            &Environment {
                uuid: environment.uuid.clone(),
                name: environment.name.clone(),
            },
        )?;
        Ok(())
    }
}
