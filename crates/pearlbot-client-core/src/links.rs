/// Handle of the theme app-embed block shipped with the app extension.
pub const APP_EMBED_HANDLE: &str = "chatbot-embed";

/// Theme-editor deep link that opens the app-embeds panel with the PearlBot
/// embed pre-selected for activation.
pub fn theme_editor_url(shop_domain: &str, extension_id: &str) -> Option<String> {
    let shop = shop_domain.trim();
    let extension_id = extension_id.trim();
    if shop.is_empty() || extension_id.is_empty() {
        return None;
    }

    Some(format!(
        "https://{shop}/admin/themes/current/editor?context=apps&template=index&activateAppId={extension_id}/{APP_EMBED_HANDLE}"
    ))
}

pub fn dashboard_url(pearlbot_base_url: &str) -> String {
    format!("{}/dashboard", pearlbot_base_url.trim().trim_end_matches('/'))
}

pub fn account_settings_url(pearlbot_base_url: &str) -> String {
    format!("{}#accountsettings", dashboard_url(pearlbot_base_url))
}
