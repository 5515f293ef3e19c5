//! Line-oriented requests sent to the device app

use crate::config::ClientConfig;
use crate::constants::CLIENT_CAPABILITY;
use crate::protocol::StreamParameters;

/// Starts the audio stream; the device answers with framed AAC
pub const AUDIO_REQUEST: &str = "CMD /v2/audio.3\r\n\r\n";

/// Asks for the battery level; the body starts with a decimal percentage
pub const BATTERY_REQUEST: &str = "GET /battery HTTP/1.1\r\n\r\n";

/// Stream-start request for video
pub fn video_request(params: &StreamParameters, port_hint: u16, client: &ClientConfig) -> String {
    format!(
        "CMD /v4/video.{}?{}&port={}&client={}&host={}&version={}&cap={}\r\n\r\n",
        params.format.wire_name(),
        params.resolution.label(),
        port_hint,
        sanitize(&client.platform),
        sanitize(&client.host_version),
        sanitize(&client.version),
        CLIENT_CAPABILITY,
    )
}

/// Pushes the tally light state (`program`, `preview` or `idle`)
pub fn tally_request(state: &str) -> String {
    format!("PUT /v1/tally/{}/ HTTP/1.1\r\n\r\n", state)
}

// Keeps a free-form string from breaking the request line
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '&' && c != '?' { c } else { '_' })
        .collect()
}
