//! WS-Management shell operations over HTTP(S).
//!
//! Envelopes are rendered from fixed templates and responses are scanned for
//! the handful of elements the shell protocol needs (`ShellId`, `CommandId`,
//! `Stream`, `CommandState`, `ExitCode`, SOAP faults). Authentication is left
//! to the HTTP layer: credentials from [`ClientConfig`] are attached as Basic
//! credentials on every request.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::Client;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{CommandOptions, ReceivedOutput, Transport};
use crate::config::ClientConfig;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const ACTION_SEND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send";

const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WSManFault code for an expired receive long-poll.
const TIMED_OUT_FAULT_CODE: &str = "2150858793";

/// Build the HTTP client used by [`HttpTransport`] from listener settings.
pub fn build_http_client(config: &ClientConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(config.insecure)
        .pool_max_idle_per_host(config.max_connections_per_host)
        .build()
        .map_err(|e| Error::transport_with_source("failed to create HTTP client", e))
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// WS-Management transport over a caller-supplied [`reqwest::Client`].
pub struct HttpTransport {
    config: ClientConfig,
    endpoint: String,
    client: Client,
}

impl HttpTransport {
    /// Create a transport for the listener described by `config`.
    ///
    /// Validates the settings but performs no network round trip.
    pub fn new(config: ClientConfig, client: Client) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint_url();
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// POST an envelope and return the response body of a successful exchange.
    async fn send_request(&self, action: &str, envelope: String) -> Result<String> {
        trace!(endpoint = %self.endpoint, action = %action, "Sending WS-Management request");

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(envelope);
        if !self.config.user.is_empty() {
            request = request.basic_auth(&self.config.user, Some(&self.config.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport_with_source(format!("HTTP request to {} failed", self.endpoint), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport_with_source("failed to read response body", e))?;

        if status.is_success() {
            return Ok(body);
        }
        if let Some(fault) = parse_fault(&body) {
            return Err(fault);
        }
        if status.as_u16() == 401 {
            return Err(Error::transport(format!(
                "authentication rejected by {}",
                self.endpoint
            )));
        }
        Err(Error::transport(format!(
            "unexpected HTTP status {} from {}",
            status, self.endpoint
        )))
    }

    /// Render a full envelope around `body`.
    fn envelope(&self, action: &str, shell_id: Option<&str>, options: &str, body: &str) -> String {
        let selector = shell_id
            .map(|id| {
                format!(
                    r#"
    <w:SelectorSet>
      <w:Selector Name="ShellId">{}</w:Selector>
    </w:SelectorSet>"#,
                    xml_escape(id)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header>
    <a:To>{}</a:To>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <a:ReplyTo>
      <a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address>
    </a:ReplyTo>
    <a:Action s:mustUnderstand="true">{}</a:Action>
    <a:MessageID>uuid:{}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{}</w:MaxEnvelopeSize>
    <w:OperationTimeout>{}</w:OperationTimeout>{}{}
  </s:Header>
  <s:Body>{}</s:Body>
</s:Envelope>"#,
            xml_escape(&self.endpoint),
            action,
            Uuid::new_v4(),
            self.config.max_envelope_size,
            self.config.operation_timeout_xml(),
            selector,
            options,
            body
        )
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("user", &self.config.user)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create_shell(&self) -> Result<String> {
        let options = format!(
            r#"
    <w:OptionSet xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
      <w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>
      <w:Option Name="WINRS_CODEPAGE">{}</w:Option>
    </w:OptionSet>"#,
            self.config.codepage
        );
        let body = r#"
    <rsp:Shell>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>"#;

        let envelope = self.envelope(ACTION_CREATE, None, &options, body);
        let response = self.send_request(ACTION_CREATE, envelope).await?;
        let shell_id = extract_shell_id(&response)?;

        debug!(shell_id = %shell_id, endpoint = %self.endpoint, "Created WinRM shell");
        Ok(shell_id)
    }

    async fn create_command(
        &self,
        shell_id: &str,
        command: &str,
        args: &[String],
        options: CommandOptions,
    ) -> Result<String> {
        let option_set = format!(
            r#"
    <w:OptionSet>
      <w:Option Name="WINRS_CONSOLEMODE_STDIN">{}</w:Option>
      <w:Option Name="WINRS_SKIP_CMD_SHELL">{}</w:Option>
    </w:OptionSet>"#,
            xml_bool(options.console_mode_stdin),
            xml_bool(options.skip_cmd_shell)
        );
        let args_xml: String = args
            .iter()
            .map(|arg| format!("<rsp:Arguments>{}</rsp:Arguments>", xml_escape(arg)))
            .collect();
        let body = format!(
            r#"
    <rsp:CommandLine>
      <rsp:Command>{}</rsp:Command>{}
    </rsp:CommandLine>"#,
            xml_escape(command),
            args_xml
        );

        let envelope = self.envelope(ACTION_COMMAND, Some(shell_id), &option_set, &body);
        let response = self.send_request(ACTION_COMMAND, envelope).await?;
        extract_command_id(&response)
    }

    async fn send_input(
        &self,
        shell_id: &str,
        command_id: &str,
        data: &[u8],
        eof: bool,
    ) -> Result<()> {
        let end = if eof { r#" End="true""# } else { "" };
        let body = format!(
            r#"
    <rsp:Send>
      <rsp:Stream Name="stdin" CommandId="{}"{}>{}</rsp:Stream>
    </rsp:Send>"#,
            xml_escape(command_id),
            end,
            BASE64_STANDARD.encode(data)
        );

        let envelope = self.envelope(ACTION_SEND, Some(shell_id), "", &body);
        self.send_request(ACTION_SEND, envelope).await?;
        Ok(())
    }

    async fn receive_output(&self, shell_id: &str, command_id: &str) -> Result<ReceivedOutput> {
        let body = format!(
            r#"
    <rsp:Receive>
      <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
    </rsp:Receive>"#,
            xml_escape(command_id)
        );

        let envelope = self.envelope(ACTION_RECEIVE, Some(shell_id), "", &body);
        match self.send_request(ACTION_RECEIVE, envelope).await {
            Ok(response) => parse_receive(&response),
            Err(Error::Protocol { code, .. })
                if code.as_deref().is_some_and(is_timed_out_code) =>
            {
                trace!(shell_id = %shell_id, command_id = %command_id, "Receive long-poll expired");
                Ok(ReceivedOutput::pending())
            }
            Err(e) => Err(e),
        }
    }

    async fn signal_terminate(&self, shell_id: &str, command_id: &str) -> Result<()> {
        let body = format!(
            r#"
    <rsp:Signal CommandId="{}">
      <rsp:Code>{SIGNAL_TERMINATE}</rsp:Code>
    </rsp:Signal>"#,
            xml_escape(command_id)
        );

        let envelope = self.envelope(ACTION_SIGNAL, Some(shell_id), "", &body);
        self.send_request(ACTION_SIGNAL, envelope).await?;
        Ok(())
    }

    async fn delete_shell(&self, shell_id: &str) -> Result<()> {
        let envelope = self.envelope(ACTION_DELETE, Some(shell_id), "", "");
        self.send_request(ACTION_DELETE, envelope).await?;
        debug!(shell_id = %shell_id, "Deleted WinRM shell");
        Ok(())
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// A leaf element found in a response body.
struct Element<'a> {
    /// Raw start tag text between `<` and `>`
    tag: &'a str,
    /// Text up to the next closing tag; empty for self-closing tags
    content: &'a str,
}

impl<'a> Element<'a> {
    fn attribute(&self, name: &str) -> Option<&'a str> {
        self.tag.split_whitespace().find_map(|part| {
            let value = part.trim_end_matches('/').strip_prefix(name)?.strip_prefix('=')?;
            Some(value.trim_matches(|c| c == '"' || c == '\''))
        })
    }
}

/// Iterate over start tags whose local name (after any prefix) is `local_name`.
fn elements<'a>(body: &'a str, local_name: &'a str) -> impl Iterator<Item = Element<'a>> + 'a {
    let mut pos = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = body[pos..].find('<') {
            let start = pos + offset + 1;
            let end = start + body[start..].find('>')?;
            pos = end + 1;

            let tag = &body[start..end];
            if tag.starts_with(['/', '?', '!']) {
                continue;
            }
            let name = tag
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .unwrap_or_default();
            let local = name.rsplit(':').next().unwrap_or(name);
            if local != local_name {
                continue;
            }
            if tag.ends_with('/') {
                return Some(Element { tag, content: "" });
            }
            let close = body[pos..].find("</").map_or(body.len(), |i| pos + i);
            return Some(Element {
                tag,
                content: &body[pos..close],
            });
        }
        None
    })
}

fn element_text<'a>(body: &'a str, local_name: &'a str) -> Option<&'a str> {
    elements(body, local_name).next().map(|e| e.content.trim())
}

/// Extract the shell ID from a create response.
fn extract_shell_id(response: &str) -> Result<String> {
    element_text(response, "ShellId")
        .filter(|id| !id.is_empty())
        .or_else(|| {
            elements(response, "Selector")
                .find(|e| e.attribute("Name") == Some("ShellId"))
                .map(|e| e.content.trim())
        })
        .map(str::to_string)
        .ok_or_else(|| Error::protocol(None, "create response carries no ShellId"))
}

/// Extract the command ID from a command response.
fn extract_command_id(response: &str) -> Result<String> {
    element_text(response, "CommandId")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::protocol(None, "command response carries no CommandId"))
}

/// Decode the streams, state and exit code of a receive response.
fn parse_receive(response: &str) -> Result<ReceivedOutput> {
    let mut output = ReceivedOutput::pending();

    for stream in elements(response, "Stream") {
        let content = stream.content.trim();
        if content.is_empty() {
            continue;
        }
        let decoded = BASE64_STANDARD
            .decode(content)
            .map_err(|e| Error::protocol(None, format!("stream payload is not base64: {e}")))?;
        match stream.attribute("Name") {
            Some("stdout") => output.stdout.extend_from_slice(&decoded),
            Some("stderr") => output.stderr.extend_from_slice(&decoded),
            other => trace!(stream = ?other, "Ignoring unexpected output stream"),
        }
    }

    output.done = elements(response, "CommandState")
        .any(|e| e.attribute("State").is_some_and(|s| s.ends_with("/Done")));

    if let Some(code) = element_text(response, "ExitCode") {
        let code = code
            .parse::<i64>()
            .map_err(|e| Error::protocol(None, format!("invalid exit code '{code}': {e}")))?;
        // Windows exit codes are DWORDs; keep the bit pattern.
        output.exit_code = Some(code as i32);
    }

    Ok(output)
}

/// Convert a SOAP fault body into a protocol error.
fn parse_fault(body: &str) -> Option<Error> {
    elements(body, "Fault").next()?;

    let code = elements(body, "WSManFault")
        .find_map(|e| e.attribute("Code"))
        .map(str::to_string)
        .or_else(|| {
            elements(body, "Value")
                .last()
                .map(|e| e.content.trim().to_string())
        });
    let reason = elements(body, "Message")
        .map(|e| e.content.trim())
        .find(|m| !m.is_empty())
        .or_else(|| element_text(body, "Text"))
        .unwrap_or("unspecified fault")
        .to_string();

    Some(Error::protocol(code, xml_unescape(&reason)))
}

fn is_timed_out_code(code: &str) -> bool {
    code == TIMED_OUT_FAULT_CODE || code.ends_with("TimedOut")
}

// ============================================================================
// Helper Functions
// ============================================================================

fn xml_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Escape special characters for XML
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ============================================================================
// Tests
// ============================================================================
