use crate::{version::UpdateStatus, AppState};

pub async fn check_update(state: &AppState) -> Result<UpdateStatus, String> {
    Ok(state.version.check_update().await)
}
