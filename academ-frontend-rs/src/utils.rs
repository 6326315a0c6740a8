pub fn set_panic_hook() {
    // When the `console_error_panic_hook` feature is enabled, we can call the
    // `set_panic_hook` function at least once during initialization, and then
    // we will get better error messages if our code ever panics.
    //
    // For more details see
    // https://github.com/rustwasm/console_error_panic_hook#readme
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

pub fn ai_server_url() -> &'static str {
    if cfg!(feature = "local-backend") {
        "http://localhost:8080"
    } else {
        "https://academ-ai-backend.fly.dev"
    }
}

pub async fn hit_ai_server(
    path: &str,
    request: impl serde::Serialize,
    access_token: Option<&String>,
) -> Result<fetch_happen::Response, fetch_happen::Error> {
    let client = fetch_happen::Client;
    let url = ai_server_url();
    // Always include an Authorization header - use "anonymous" as dummy token when not logged in
    let token = access_token.map(|t| t.as_str()).unwrap_or("anonymous");
    let response = client
        .post(format!("{url}{path}"))
        .json(&request)?
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await?;
    Ok(response)
}
