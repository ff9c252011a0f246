//! Maps platform senders to internal users, registering on first contact.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::datastore::Datastore;
use crate::error::Result;
use crate::messenger::PlatformClient;
use crate::models::weaver::User;

/// Platform tag prefixed onto internal user ids, e.g. `fb/123456`.
pub const PLATFORM_FACEBOOK: &str = "fb";

/// First-name sentinel when the upstream profile carries none.
const UNDEFINED_NAME: &str = "undefined";

const WELCOME_TEXT: &str =
    "Welcome to the sound archive! Send a voice note and I will keep it safe.";

/// Returns the internal user id for a platform sender, creating the user on
/// first contact.
///
/// A known sender returns immediately with no side effects, so repeated
/// calls perform exactly one registration and one upstream profile lookup.
pub async fn resolve_or_register(
    datastore: &Datastore,
    platform: &dyn PlatformClient,
    platform_user_id: &str,
) -> Result<String> {
    let internal_id = format!("{PLATFORM_FACEBOOK}/{platform_user_id}");
    if let Some(user) = datastore.get_user_by_id(&internal_id).await? {
        return Ok(user.id);
    }

    // Upstream transport failures propagate; registration is not retried.
    let profile = platform.fetch_profile(platform_user_id).await?;
    let user = User {
        id: internal_id.clone(),
        username: internal_id.clone(),
        first_name: profile
            .first_name
            .unwrap_or_else(|| UNDEFINED_NAME.to_string()),
        last_name: profile.last_name,
        voice_set: BTreeSet::new(),
        prompt_set: BTreeSet::new(),
    };
    datastore.insert_user(&user).await?;
    info!(user = %internal_id, "registered first-contact user");

    // The greeting is best effort; a failed reply must not fail registration.
    if let Err(e) = platform.send_text(platform_user_id, WELCOME_TEXT).await {
        warn!(user = %internal_id, error = %e, "could not send welcome message");
    }
    Ok(internal_id)
}
