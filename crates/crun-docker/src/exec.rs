//! Exec session client.

use crate::api;
use crate::codec;
use crate::error::Result;
use crate::logs::{FrameDecoder, LogStream};
use crate::models::{ExecConfig, ExecInspectResponse, ExecStartConfig, IdResponse};
use crate::transport::{Request, Transport};
use crun_types::{LogRecord, LogStreamKind};
use futures_util::stream::unfold;
use std::sync::Arc;

#[derive(Clone)]
pub struct ExecClient {
    transport: Arc<Transport>,
}

impl ExecClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /containers/{id}/exec` → exec ID.
    pub async fn create(&self, container: &str, cmd: Vec<String>) -> Result<String> {
        let config = ExecConfig {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            cmd: Some(cmd),
            ..Default::default()
        };
        let request = Request::post(&format!("/containers/{}/exec", container))
            .json_body(codec::encode(&config)?);
        let response: IdResponse = api::unary_json(&self.transport, request).await?;
        Ok(response.id)
    }

    /// `POST /exec/{id}/start` → demuxed output stream.
    ///
    /// The stream ends when the command's output does; exec output uses
    /// the same multiplexed framing as container logs.
    pub async fn start(&self, exec_id: &str) -> Result<LogStream> {
        let body = ExecStartConfig {
            detach: Some(false),
            tty: Some(false),
        };
        let request = Request::post(&format!("/exec/{}/start", exec_id))
            .json_body(codec::encode(&body)?);
        let session = api::open_stream(&self.transport, request).await?;

        struct State {
            session: crate::transport::StreamSession,
            decoder: FrameDecoder,
            finished: bool,
        }
        let state = State {
            session,
            decoder: FrameDecoder::new(),
            finished: false,
        };
        Ok(Box::pin(unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            loop {
                match st.decoder.next_record() {
                    Ok(Some(record)) => return Some((Ok(record), st)),
                    Ok(None) => {}
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e.into()), st));
                    }
                }
                match st.session.next_chunk().await {
                    Ok(Some(chunk)) => st.decoder.feed(&chunk),
                    Ok(None) => {
                        st.finished = true;
                        if let Err(e) = st.decoder.finish() {
                            return Some((Err(e.into()), st));
                        }
                        return None;
                    }
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e.into()), st));
                    }
                }
            }
        })))
    }

    /// `GET /exec/{id}/json` → exit code once the command finished.
    pub async fn inspect(&self, exec_id: &str) -> Result<ExecInspectResponse> {
        api::unary_json(&self.transport, Request::get(&format!("/exec/{}/json", exec_id))).await
    }
}

/// Collected output of a finished exec.
#[derive(Debug, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn push(&mut self, record: &LogRecord) {
        let target = match record.stream {
            LogStreamKind::Stdout => &mut self.stdout,
            LogStreamKind::Stderr => &mut self.stderr,
        };
        if !target.is_empty() {
            target.push('\n');
        }
        target.push_str(&record.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_output_separates_streams() {
        let mut output = ExecOutput::default();
        output.push(&LogRecord {
            stream: LogStreamKind::Stdout,
            message: "one".to_owned(),
        });
        output.push(&LogRecord {
            stream: LogStreamKind::Stderr,
            message: "oops".to_owned(),
        });
        output.push(&LogRecord {
            stream: LogStreamKind::Stdout,
            message: "two".to_owned(),
        });
        assert_eq!(output.stdout, "one\ntwo");
        assert_eq!(output.stderr, "oops");
    }
}
