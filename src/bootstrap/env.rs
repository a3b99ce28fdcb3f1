pub async fn init_env() {
    // A missing .env is fine, the process environment is used as is.
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("cannot load `.env`: {err}");
        }
    }
}
