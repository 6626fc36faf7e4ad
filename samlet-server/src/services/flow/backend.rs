use async_trait::async_trait;

use samlet_connect::config::ProviderConfig;
use samlet_connect::mapper::apply_attribute_map;
use samlet_connect::reconcile::{lookup_value, reconcile};
use samlet_connect::RawAttributes;
use samlet_core::{errors, Result};
use samlet_storage::{IdentityStore, Lookup, Session, User};

use crate::SamlSettings;

/// Application-defined side effect run after a successful
/// reconciliation, e.g. group sync. Failures are not caught here and
/// abort the login.
#[async_trait]
pub trait PostLoginHook: Send + Sync {
    async fn after_login(
        &self,
        user: &User,
        attributes: &RawAttributes,
    ) -> Result<()>;
}

/// Reconcile the session's attribute statement into a local identity:
/// apply the provider's attribute map, resolve the user-field map under
/// the configured policy, then look up or sync the identity by the
/// lookup attribute.
pub async fn authenticate<U: IdentityStore>(
    user_store: &U,
    settings: &SamlSettings,
    provider: &ProviderConfig,
    session: &Session,
    hook: Option<&dyn PostLoginHook>,
) -> Result<User> {
    if session.session_index.is_none() {
        return Err(errors::unauthenticated());
    }

    let user_map =
        settings.users_map.get(&provider.name).ok_or_else(|| {
            errors::configuration(&format!(
                "no users_map entry for provider {}",
                provider.name
            ))
        })?;

    // An empty statement is tolerated here; strict mapping decides
    // below whether that is fatal.
    let mut user_data = session.attributes.clone();
    if let Some(map) = provider.idp.attribute_map.as_deref() {
        user_data = apply_attribute_map(map, &user_data);
    }

    let record =
        reconcile(user_map, &user_data, settings.mapping_policy())?;
    let lookup = Lookup {
        field: settings.lookup_attribute.clone(),
        value: lookup_value(&record, &settings.lookup_attribute)?,
    };

    let user = if settings.sync_attributes {
        user_store.find_and_update(&lookup, &record).await?
    } else {
        user_store.find_or_create(&lookup, &record).await?
    };

    if let Some(hook) = hook {
        hook.after_login(&user, &user_data).await?;
    }

    Ok(user)
}
