//! Matching Engine - pairs initiators with responders
//!
//! The engine handles:
//! 1. Registering responders and initiators (management-key gated)
//! 2. Authorizing an initiator against a responder's access keys
//! 3. Creating exchanges and delivering offers to responders
//! 4. Resolving exchanges with an answer or a rejection
//!
//! Directory sections are never held across a sink write: every operation
//! copies what it needs out of the directory, then delivers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core_types::{
    ExchangeId, MAX_ACCESS_KEYS, MAX_NAME_LEN, PeerName, Role, ValidationError, validate_sdp,
};
use crate::directory::{DirectoryStats, DirectoryStore, TargetLookup};
use crate::error::HubError;
use crate::messages::{
    AcceptExchangeRequest, CreateInitiatorRequest, CreateResponderRequest,
    DeleteInitiatorRequest, DeleteResponderRequest, ErrorMessage, OutboundMessage,
    RejectExchangeRequest,
};
use crate::models::{
    Answer, Exchange, FailedOffer, Initiator, Offer, Responder, ResponderPreview,
};
use crate::websocket::connection::WriterCache;
use crate::websocket::writer::PeerWriter;

/// Per-request facts supplied by the connection handler
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Remote address of the connection
    pub address: String,
    /// `conv` of the inbound envelope
    pub conversation: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(address: impl Into<String>, conversation: Option<String>) -> Self {
        Self {
            address: address.into(),
            conversation: conversation.filter(|c| !c.is_empty()),
            received_at: Utc::now(),
        }
    }
}

/// Result of one match attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Exchange created and offer delivered to the responder
    Offered(Offer),
    /// Exchange created but the responder's sink failed; the exchange stays open
    Undelivered { offer: Offer, error: HubError },
    /// Access key rejected; no exchange created
    Denied(FailedOffer),
}

/// Result of registering an initiator
#[derive(Debug, Clone, PartialEq)]
pub enum InitiatorOutcome {
    Matched(MatchOutcome),
    /// Target absent; waiting for the target's registration sweep
    Pending,
    /// Target absent and the initiator asked not to wait
    TargetMissing,
}

/// One sweep target that did not end in a delivered offer
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFailure {
    pub initiator: String,
    pub exchange_id: Option<ExchangeId>,
    pub error: HubError,
}

/// Aggregated outcome of a responder's registration sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub responder: String,
    pub offered: Vec<ExchangeId>,
    pub denied: Vec<FailedOffer>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn attempted(&self) -> usize {
        self.offered.len() + self.denied.len() + self.failures.len()
    }
}

/// A registered responder plus the handle of its background sweep
#[derive(Debug)]
pub struct RegisteredResponder {
    pub responder: Responder,
    pub sweep: JoinHandle<SweepReport>,
}

/// Matching engine shared by every connection task
#[derive(Clone)]
pub struct MatchingEngine {
    directory: Arc<dyn DirectoryStore>,
    writers: Arc<WriterCache>,
}

impl MatchingEngine {
    pub fn new(directory: Arc<dyn DirectoryStore>, writers: Arc<WriterCache>) -> Self {
        Self { directory, writers }
    }

    pub fn writers(&self) -> &Arc<WriterCache> {
        &self.writers
    }

    pub fn directory(&self) -> &Arc<dyn DirectoryStore> {
        &self.directory
    }

    // ========================================================================
    // Responders
    // ========================================================================

    /// Register (or re-register) a responder
    ///
    /// # Flow:
    /// 1. Validate and build the responder
    /// 2. Under the name's registration lock: store it (a management-key
    ///    mismatch fails with `Conflict`), then install the caller's writer,
    ///    closing any previous connection
    /// 3. Acknowledge the caller
    /// 4. Spawn the sweep over initiators already waiting for this name
    pub async fn register_responder(
        &self,
        writer: Arc<PeerWriter>,
        req: CreateResponderRequest,
        ctx: RequestContext,
    ) -> Result<RegisteredResponder, HubError> {
        let responder = build_responder(writer.clone(), req, &ctx)?;
        let name = responder.name.clone();

        let previous = {
            let _registration = self
                .writers
                .lock_registration(Role::Responder, &name)
                .await;
            let previous = self.directory.upsert_responder(responder.clone())?;
            if let Err(e) = self
                .writers
                .set(Role::Responder, &name, writer.clone(), true)
                .await
            {
                warn!(responder = %name, error = %e, "Failed to close replaced responder connection");
            }
            previous
        };

        info!(
            responder = %name,
            protected = responder.is_protected(),
            replaced = previous.is_some(),
            address = %ctx.address,
            "Responder registered"
        );

        if let Err(e) = writer.info(format!("responder {name} registered")).await {
            let waiting = self.directory.list_pending_initiators(&name).len();
            warn!(
                responder = %name,
                waiting,
                error = %e,
                "Registration ack failed, sweep skipped"
            );
            return Err(e.into());
        }

        let engine = self.clone();
        let sweep_name = name.clone();
        let sweep = tokio::spawn(async move { engine.sweep(&sweep_name).await });

        Ok(RegisteredResponder { responder, sweep })
    }

    /// Await a sweep handle, logging a panicked or cancelled sweep
    pub async fn supervise_sweep(
        responder: PeerName,
        sweep: JoinHandle<SweepReport>,
    ) -> Option<SweepReport> {
        match sweep.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(responder = %responder, error = %e, "Registration sweep did not complete");
                None
            }
        }
    }

    /// Attempt a match for every initiator waiting for `responder_name`
    ///
    /// Each target is reported independently; one failure never aborts the
    /// sweep.
    pub async fn sweep(&self, responder_name: &PeerName) -> SweepReport {
        let mut report = SweepReport {
            responder: responder_name.to_string(),
            ..Default::default()
        };

        let pending = self.directory.take_pending_initiators(responder_name);
        if pending.is_empty() {
            debug!(responder = %responder_name, "No pending initiators");
            return report;
        }

        let Some(responder) = self.directory.get_responder(responder_name) else {
            // Deleted between registration and sweep: keep everyone waiting.
            for initiator in pending {
                let initiator_name = initiator.name.to_string();
                if let Err(e) = self.directory.upsert_initiator(initiator) {
                    warn!(initiator = %initiator_name, error = %e, "Failed to re-queue initiator");
                }
            }
            return report;
        };

        for initiator in pending {
            let initiator_name = initiator.name.to_string();
            match self.match_pair(initiator, responder.clone()).await {
                MatchOutcome::Offered(offer) => report.offered.push(offer.id),
                MatchOutcome::Denied(failed) => report.denied.push(failed),
                MatchOutcome::Undelivered { offer, error } => {
                    warn!(
                        responder = %responder_name,
                        initiator = %initiator_name,
                        exchange_id = %offer.id,
                        error = %error,
                        "Sweep failed to deliver offer"
                    );
                    report.failures.push(SweepFailure {
                        initiator: initiator_name,
                        exchange_id: Some(offer.id),
                        error,
                    });
                }
            }
        }

        info!(
            responder = %responder_name,
            attempted = report.attempted(),
            offered = report.offered.len(),
            denied = report.denied.len(),
            failed = report.failures.len(),
            "Registration sweep finished"
        );
        report
    }

    pub async fn delete_responder(
        &self,
        writer: Arc<PeerWriter>,
        req: DeleteResponderRequest,
    ) -> Result<Responder, HubError> {
        let name = PeerName::new("name", &req.name)?;
        let removed = {
            let _registration = self
                .writers
                .lock_registration(Role::Responder, &name)
                .await;
            let removed = self.directory.delete_responder(&name, &req.management_key)?;
            self.writers.remove(Role::Responder, &name);
            removed
        };
        info!(responder = %name, "Responder deleted");
        writer.info(format!("responder {name} deleted")).await?;
        Ok(removed)
    }

    // ========================================================================
    // Initiators
    // ========================================================================

    /// Register an initiator and match it immediately if its target exists
    pub async fn register_initiator(
        &self,
        writer: Arc<PeerWriter>,
        req: CreateInitiatorRequest,
        ctx: RequestContext,
    ) -> Result<InitiatorOutcome, HubError> {
        let initiator = build_initiator(writer.clone(), req, &ctx)?;
        let name = initiator.name.clone();
        let target = initiator.target.clone();

        let registration = self
            .writers
            .lock_registration(Role::Initiator, &name)
            .await;
        let lookup = self.directory.find_responder_or_enqueue(initiator.clone())?;
        if !matches!(lookup, TargetLookup::Missing) {
            self.install_initiator_writer(&name, writer.clone()).await;
        }
        drop(registration);

        match lookup {
            TargetLookup::Missing => {
                debug!(initiator = %name, target = %target, "Target missing, not waiting");
                writer.info(format!("responder {target} not found")).await?;
                Ok(InitiatorOutcome::TargetMissing)
            }
            TargetLookup::Enqueued { replaced } => {
                info!(
                    initiator = %name,
                    target = %target,
                    replaced = replaced.is_some(),
                    "Initiator waiting for responder"
                );
                writer
                    .info(format!("initiator {name} waiting for responder {target}"))
                    .await?;
                Ok(InitiatorOutcome::Pending)
            }
            TargetLookup::Found(responder) => {
                let outcome = self.match_pair(initiator, responder).await;
                match &outcome {
                    MatchOutcome::Offered(offer) => {
                        writer
                            .info(format!("offer for responder {} sent", offer.responder))
                            .await?;
                    }
                    MatchOutcome::Undelivered { error, .. } => {
                        writer.error(error).await?;
                    }
                    // The failed offer already went to this writer.
                    MatchOutcome::Denied(_) => {}
                }
                Ok(InitiatorOutcome::Matched(outcome))
            }
        }
    }

    async fn install_initiator_writer(&self, name: &PeerName, writer: Arc<PeerWriter>) {
        if let Err(e) = self.writers.set(Role::Initiator, name, writer, true).await {
            warn!(initiator = %name, error = %e, "Failed to close replaced initiator connection");
        }
    }

    pub async fn delete_initiator(
        &self,
        writer: Arc<PeerWriter>,
        req: DeleteInitiatorRequest,
    ) -> Result<Initiator, HubError> {
        let name = PeerName::new("name", &req.name)?;
        let target = PeerName::new("targetname", &req.target_name)?;
        let removed = self
            .directory
            .delete_initiator(&target, &name, &req.management_key)?;
        info!(initiator = %name, target = %target, "Pending initiator deleted");
        writer
            .info(format!("initiator {name} no longer waiting for {target}"))
            .await?;
        Ok(removed)
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Authorize `initiator` against `responder` and, on success, open an
    /// exchange and deliver the offer to the responder
    pub async fn match_pair(&self, initiator: Initiator, responder: Responder) -> MatchOutcome {
        if !responder.access_key_matches(&initiator.target_access_key) {
            let denied = HubError::AccessDenied(format!(
                "invalid access key for responder {}",
                responder.name
            ));
            let failed = FailedOffer {
                initiator: initiator.name.to_string(),
                responder: responder.name.to_string(),
                reason: denied.to_string(),
                code: denied.code().to_string(),
            };
            info!(
                initiator = %initiator.name,
                responder = %responder.name,
                "Offer denied: access key mismatch"
            );
            if let Err(e) = initiator
                .writer
                .write_in(
                    initiator.conversation.as_deref(),
                    OutboundMessage::OfferFailed(failed.clone()),
                )
                .await
            {
                warn!(initiator = %initiator.name, error = %e, "Failed to report denied offer");
            }
            return MatchOutcome::Denied(failed);
        }

        let sink = self
            .writers
            .get(Role::Responder, &responder.name)
            .unwrap_or_else(|| responder.writer.clone());
        let conversation = responder.conversation.clone();

        let exchange = Exchange::new(initiator, responder);
        let offer = exchange.offer();
        self.directory.create_exchange(exchange);

        info!(
            exchange_id = %offer.id,
            initiator = %offer.initiator,
            responder = %offer.responder,
            "Exchange created"
        );

        match sink
            .write_in(conversation.as_deref(), OutboundMessage::Offer(offer.clone()))
            .await
        {
            Ok(()) => MatchOutcome::Offered(offer),
            Err(e) => MatchOutcome::Undelivered {
                offer,
                error: e.into(),
            },
        }
    }

    // ========================================================================
    // Exchange resolution
    // ========================================================================

    /// Deliver the responder's answer to the exchange's initiator
    ///
    /// The exchange is consumed whether or not delivery succeeds.
    pub async fn accept_exchange(
        &self,
        writer: Arc<PeerWriter>,
        req: AcceptExchangeRequest,
    ) -> Result<Answer, HubError> {
        let id = parse_exchange_id(&req.exchange_id)?;
        validate_sdp(&req.sdp)?;

        let exchange = self
            .directory
            .delete_exchange(&id)
            .ok_or_else(|| HubError::NotFound(format!("exchange {id}")))?;
        self.directory
            .touch_responder(&exchange.responder.name, Utc::now());

        let answer = exchange.answer(req.sdp);
        exchange
            .initiator
            .writer
            .write_in(
                exchange.initiator.conversation.as_deref(),
                OutboundMessage::AgreementAnswer(answer.clone()),
            )
            .await?;

        info!(
            exchange_id = %id,
            initiator = %exchange.initiator.name,
            responder = %exchange.responder.name,
            "Exchange answered"
        );
        writer
            .info(format!("answer sent to {}", exchange.initiator.name))
            .await?;
        Ok(answer)
    }

    /// Deliver a rejection to the exchange's initiator
    ///
    /// Same lookup and single-use discipline as `accept_exchange`.
    pub async fn reject_exchange(
        &self,
        writer: Arc<PeerWriter>,
        req: RejectExchangeRequest,
    ) -> Result<(), HubError> {
        let id = parse_exchange_id(&req.exchange_id)?;
        let reason = if req.reason.trim().is_empty() {
            "rejected".to_string()
        } else {
            req.reason
        };

        let exchange = self
            .directory
            .delete_exchange(&id)
            .ok_or_else(|| HubError::NotFound(format!("exchange {id}")))?;
        self.directory
            .touch_responder(&exchange.responder.name, Utc::now());

        exchange
            .initiator
            .writer
            .write_in(
                exchange.initiator.conversation.as_deref(),
                OutboundMessage::Error(ErrorMessage::rejected(id, &reason)),
            )
            .await?;

        info!(
            exchange_id = %id,
            initiator = %exchange.initiator.name,
            reason = %reason,
            "Exchange rejected"
        );
        writer
            .info(format!("rejection sent to {}", exchange.initiator.name))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    /// Responder previews, sorted by name
    pub fn list_responders(&self) -> Vec<ResponderPreview> {
        let mut previews: Vec<_> = self
            .directory
            .list_responders()
            .iter()
            .map(Responder::preview)
            .collect();
        previews.sort_by(|a, b| a.name.cmp(&b.name));
        previews
    }

    pub fn stats(&self) -> DirectoryStats {
        self.directory.stats()
    }
}

fn parse_exchange_id(raw: &str) -> Result<ExchangeId, HubError> {
    ExchangeId::parse(raw).ok_or_else(|| HubError::Validation(format!("invalid exchange id: {raw}")))
}

fn build_responder(
    writer: Arc<PeerWriter>,
    req: CreateResponderRequest,
    ctx: &RequestContext,
) -> Result<Responder, HubError> {
    let name = PeerName::new("name", &req.name)?;

    let access_keys: std::collections::BTreeSet<String> = req
        .access_keys
        .into_iter()
        .filter(|k| !k.is_empty())
        .collect();
    if access_keys.len() > MAX_ACCESS_KEYS {
        return Err(ValidationError::TooLong {
            field: "accesskeys",
            max: MAX_ACCESS_KEYS,
            actual: access_keys.len(),
        }
        .into());
    }
    if let Some(key) = access_keys.iter().find(|k| k.len() > MAX_NAME_LEN) {
        return Err(ValidationError::TooLong {
            field: "accesskey",
            max: MAX_NAME_LEN,
            actual: key.len(),
        }
        .into());
    }

    Ok(Responder {
        name,
        access_keys,
        management_key: req.management_key,
        description: req.description,
        address: ctx.address.clone(),
        conversation: ctx.conversation.clone(),
        writer,
        registered_at: ctx.received_at,
        last_seen_at: ctx.received_at,
    })
}

fn build_initiator(
    writer: Arc<PeerWriter>,
    req: CreateInitiatorRequest,
    ctx: &RequestContext,
) -> Result<Initiator, HubError> {
    let name = PeerName::new("name", &req.name)?;
    let target = PeerName::new("targetname", &req.target_name)?;
    validate_sdp(&req.sdp)?;

    Ok(Initiator {
        name,
        target,
        target_access_key: req.target_access_key,
        management_key: req.management_key,
        sdp: req.sdp,
        address: ctx.address.clone(),
        conversation: ctx.conversation.clone(),
        writer,
        ignore_if_target_missing: req.ignore_if_target_missing,
        created_at: ctx.received_at,
    })
}
