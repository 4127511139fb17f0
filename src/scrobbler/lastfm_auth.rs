// Last.fm desktop authentication flow
// Request a token, let the user approve it in a browser, exchange it for a session

use super::lastfm::LastFmClient;
use crate::session::Session;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Perform the complete token authentication flow.
/// Returns the new session, which the client has already stored and persisted.
pub fn authenticate<R: BufRead, W: Write>(
    client: &LastFmClient,
    input: &mut R,
    output: &mut W,
) -> Result<Session> {
    if !client.has_credentials() {
        anyhow::bail!("Last.fm api_key and api_secret must be configured before authenticating");
    }

    writeln!(output, "Starting Last.fm authentication...\n")?;

    let token = client
        .request_token()
        .context("Failed to request an authentication token from Last.fm")?;

    writeln!(output, "Open this URL in your browser and allow access:\n")?;
    writeln!(output, "  {}\n", client.auth_url(Some(&token)))?;
    write!(output, "Press Enter once access has been granted... ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    writeln!(output, "\nExchanging token for a session...")?;
    let session = client
        .authenticate(&token)
        .context("Failed to obtain a Last.fm session")?;
    writeln!(output, "Authenticated as {}\n", session.name)?;

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrobbler::lastfm::tests::fast_settings;
    use crate::session::SessionStore;
    use crate::test_support::ScriptedTransport;
    use std::io::Cursor;
    use std::sync::Arc;

    #[test]
    fn full_flow() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(200, r#"{"token":"tok"}"#);
        transport.push_response(200, r#"{"session":{"name":"me","key":"SK"}}"#);
        let client = LastFmClient::new(
            fast_settings(),
            transport.clone(),
            SessionStore::in_dir(dir.path()),
        );
        client.set_credentials("key", "secret");

        let mut input = Cursor::new(b"\n".to_vec());
        let mut output = Vec::new();
        let session = authenticate(&client, &mut input, &mut output).unwrap();

        assert_eq!(session.key, "SK");
        assert!(client.is_authenticated());
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("api_key=key&token=tok"));
        assert_eq!(
            transport.requests()[1].param("token").as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn refuses_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let client = LastFmClient::new(
            fast_settings(),
            transport.clone(),
            SessionStore::in_dir(dir.path()),
        );

        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        assert!(authenticate(&client, &mut input, &mut output).is_err());
        assert_eq!(transport.request_count(), 0);
    }
}
