// Gateway facade
// The only surface the rest of the application uses. Every operation runs the same
// pipeline: normalize the request, make sure a credential is valid, execute with
// retries, normalize the response. Callers see a typed result or an OperationError.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::{
    audit::{AuditLogger, AuditSink, JsonLinesAuditSink, TracingAuditSink},
    clock::{Clock, SystemClock},
    config::GatewayConfig,
    credential::{
        Authenticator, CredentialCache, CredentialStore, FileCredentialCache, NoopCredentialCache,
        UpstreamAuthenticator,
    },
    error::{ConfigError, GatewayError, OperationError},
    executor::{CallContext, ExecuteOptions, OperationState, ResilientExecutor},
    model::{
        BookingConfirmation, BookingDetails, BookingDetailsRequest, BookingRequest, CancelRequest,
        CancellationResult, ConfirmRequest, FareQuote, FareQuoteRequest, FareRule, Operation,
        SearchRequest, SearchResult,
    },
    request::{self, RequestDefaults, UpstreamPayload},
    response,
    transport::{HttpTransport, Transport},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    // Budget for the whole operation, retries and backoff included
    pub deadline: Option<Duration>,
    pub correlation_id: Option<Uuid>,
}

impl CallOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[derive(Debug, Default)]
pub struct GatewayStats {
    pub calls: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub duplicate_bookings_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStatsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub duplicate_bookings_rejected: u64,
    pub attempts: u64,
    pub retries: u64,
    pub forced_refreshes: u64,
    pub ambiguous_failures: u64,
    pub auth_calls: u64,
    pub audit_write_failures: u64,
}

type OfferKey = (String, String);

// Held for the duration of one book call
struct InFlightBooking<'a> {
    bookings: &'a DashMap<OfferKey, Uuid>,
    key: OfferKey,
}

impl Drop for InFlightBooking<'_> {
    fn drop(&mut self) {
        self.bookings.remove(&self.key);
    }
}

pub struct TravelGatewayBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    credential_cache: Option<Arc<dyn CredentialCache>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl TravelGatewayBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.credential_cache = Some(cache);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<TravelGateway, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(Duration::from_millis(config.timeouts.auth_ms))
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            ),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let sink: Arc<dyn AuditSink> = match (self.audit_sink, &config.audit_log_path) {
            (Some(sink), _) => sink,
            (None, Some(path)) => Arc::new(JsonLinesAuditSink::new(path)),
            (None, None) => Arc::new(TracingAuditSink),
        };
        let audit = Arc::new(AuditLogger::new(sink, clock.clone()));

        let cache: Arc<dyn CredentialCache> =
            match (self.credential_cache, &config.credential_cache_path) {
                (Some(cache), _) => cache,
                (None, Some(path)) => Arc::new(FileCredentialCache::new(path)),
                (None, None) => Arc::new(NoopCredentialCache),
            };
        let authenticator: Arc<dyn Authenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(
                UpstreamAuthenticator::new(&config, transport.clone(), clock.clone())
                    .with_audit(audit.clone()),
            ),
        };

        let credentials = Arc::new(CredentialStore::new(
            authenticator,
            cache,
            clock.clone(),
            config.safety_margin_seconds,
        ));
        let executor =
            ResilientExecutor::new(config.clone(), transport, credentials.clone(), audit.clone());

        Ok(TravelGateway {
            config,
            clock,
            credentials,
            executor,
            audit,
            in_flight_bookings: DashMap::new(),
            stats: GatewayStats::default(),
        })
    }
}

pub struct TravelGateway {
    config: Arc<GatewayConfig>,
    clock: Arc<dyn Clock>,
    credentials: Arc<CredentialStore>,
    executor: ResilientExecutor,
    audit: Arc<AuditLogger>,
    in_flight_bookings: DashMap<OfferKey, Uuid>,
    stats: GatewayStats,
}

impl TravelGateway {
    pub fn builder(config: GatewayConfig) -> TravelGatewayBuilder {
        TravelGatewayBuilder {
            config,
            transport: None,
            clock: None,
            authenticator: None,
            credential_cache: None,
            audit_sink: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn stats(&self) -> GatewayStatsSnapshot {
        let executor = self.executor.stats();
        GatewayStatsSnapshot {
            calls: self.stats.calls.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            duplicate_bookings_rejected: self.stats.duplicate_bookings_rejected.load(Ordering::Relaxed),
            attempts: executor.attempts.load(Ordering::Relaxed),
            retries: executor.retries.load(Ordering::Relaxed),
            forced_refreshes: executor.forced_refreshes.load(Ordering::Relaxed),
            ambiguous_failures: executor.ambiguous_failures.load(Ordering::Relaxed),
            auth_calls: self.credentials.auth_calls() as u64,
            audit_write_failures: self.audit.write_failures(),
        }
    }

    #[instrument(skip_all, fields(operation = "search", correlation_id = tracing::field::Empty))]
    pub async fn search(
        &self,
        request: &SearchRequest,
        options: CallOptions,
    ) -> Result<SearchResult, OperationError> {
        let ctx = self.context(Operation::Search, options);
        let payload = request::normalize_search(request, &self.defaults());
        let trace_ttl = chrono::Duration::seconds(self.config.trace_ttl_seconds);

        self.run(ctx, payload, ExecuteOptions::default(), |body| {
            response::normalize_search_response(body, self.clock.now(), trace_ttl)
        })
        .await
    }

    #[instrument(skip_all, fields(operation = "fare_quote", correlation_id = tracing::field::Empty))]
    pub async fn fare_quote(
        &self,
        request: &FareQuoteRequest,
        options: CallOptions,
    ) -> Result<FareQuote, OperationError> {
        let ctx = self.context(Operation::FareQuote, options);
        let payload = request::normalize_fare_quote(request, &self.defaults());

        self.run(
            ctx,
            payload,
            ExecuteOptions::default(),
            response::normalize_fare_quote_response,
        )
        .await
    }

    #[instrument(skip_all, fields(operation = "fare_rules", correlation_id = tracing::field::Empty))]
    pub async fn fare_rules(
        &self,
        request: &FareQuoteRequest,
        options: CallOptions,
    ) -> Result<Vec<FareRule>, OperationError> {
        let ctx = self.context(Operation::FareRules, options);
        let payload = request::normalize_fare_rules(request, &self.defaults());

        self.run(
            ctx,
            payload,
            ExecuteOptions::default(),
            response::normalize_fare_rules_response,
        )
        .await
    }

    /// Books the offer identified by `(trace_id, result_index)`.
    ///
    /// Never retried once the request may have reached the supplier. An error with
    /// `is_ambiguous()` means the booking may exist; reconcile with
    /// [`TravelGateway::booking_details`] before trying again.
    #[instrument(skip_all, fields(operation = "book", correlation_id = tracing::field::Empty))]
    pub async fn book(
        &self,
        request: &BookingRequest,
        options: CallOptions,
    ) -> Result<BookingConfirmation, OperationError> {
        let ctx = self.context(Operation::Book, options);

        let key = (request.trace_id.clone(), request.result_index.clone());
        let _in_flight = match self.claim_booking(key, ctx.correlation_id) {
            Some(guard) => guard,
            None => {
                self.stats
                    .duplicate_bookings_rejected
                    .fetch_add(1, Ordering::Relaxed);
                self.stats.calls.fetch_add(1, Ordering::Relaxed);
                return Err(self.failed(
                    ctx,
                    GatewayError::validation("a booking for this offer is already in flight"),
                ));
            }
        };

        let payload = request::normalize_book(request, &self.defaults());
        self.run(
            ctx,
            payload,
            ExecuteOptions {
                use_secondary_endpoint: true,
            },
            response::normalize_book_response,
        )
        .await
    }

    #[instrument(skip_all, fields(operation = "confirm", correlation_id = tracing::field::Empty))]
    pub async fn confirm_booking(
        &self,
        request: &ConfirmRequest,
        options: CallOptions,
    ) -> Result<BookingConfirmation, OperationError> {
        let ctx = self.context(Operation::Confirm, options);
        let payload = request::normalize_confirm(request, &self.defaults());

        self.run(
            ctx,
            payload,
            ExecuteOptions {
                use_secondary_endpoint: true,
            },
            response::normalize_confirm_response,
        )
        .await
    }

    #[instrument(skip_all, fields(operation = "booking_details", correlation_id = tracing::field::Empty))]
    pub async fn booking_details(
        &self,
        request: &BookingDetailsRequest,
        options: CallOptions,
    ) -> Result<BookingDetails, OperationError> {
        let ctx = self.context(Operation::BookingDetails, options);
        let payload = request::normalize_booking_details(request, &self.defaults());

        self.run(
            ctx,
            payload,
            ExecuteOptions {
                use_secondary_endpoint: true,
            },
            response::normalize_booking_details_response,
        )
        .await
    }

    #[instrument(skip_all, fields(operation = "cancel", correlation_id = tracing::field::Empty))]
    pub async fn cancel(
        &self,
        request: &CancelRequest,
        options: CallOptions,
    ) -> Result<CancellationResult, OperationError> {
        let ctx = self.context(Operation::Cancel, options);
        let payload = request::normalize_cancel(request, &self.defaults());

        self.run(
            ctx,
            payload,
            ExecuteOptions {
                use_secondary_endpoint: true,
            },
            |body| response::normalize_cancel_response(body, &request.booking_reference),
        )
        .await
    }

    fn context(&self, operation: Operation, options: CallOptions) -> CallContext {
        let correlation_id = options.correlation_id.unwrap_or_else(Uuid::new_v4);
        Span::current().record("correlation_id", tracing::field::display(correlation_id));
        CallContext::new(operation, correlation_id, options.deadline)
    }

    fn defaults(&self) -> RequestDefaults {
        RequestDefaults {
            end_user_ip: self.config.end_user_ip.clone(),
            currency: self.config.default_currency.clone(),
            cabin_class: self.config.default_cabin_class,
            max_passengers: self.config.max_passengers,
            today: self.clock.now().date_naive(),
        }
    }

    fn claim_booking(&self, key: OfferKey, correlation_id: Uuid) -> Option<InFlightBooking<'_>> {
        match self.in_flight_bookings.entry(key.clone()) {
            Entry::Occupied(held) => {
                warn!(held_by = %held.get(), "duplicate booking attempt rejected");
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(correlation_id);
                Some(InFlightBooking {
                    bookings: &self.in_flight_bookings,
                    key,
                })
            }
        }
    }

    async fn run<T>(
        &self,
        mut ctx: CallContext,
        payload: Result<UpstreamPayload, GatewayError>,
        options: ExecuteOptions,
        normalize: impl Fn(&Value) -> Result<T, GatewayError>,
    ) -> Result<T, OperationError> {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);

        let outcome = match payload {
            Err(err) => Err(err),
            Ok(payload) => {
                self.executor
                    .execute_with(&mut ctx, payload, options, normalize)
                    .await
            }
        };

        match outcome {
            Ok(value) => {
                ctx.transition(OperationState::Done);
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                info!(attempts = ctx.attempts(), "upstream operation completed");
                Ok(value)
            }
            Err(kind) => Err(self.failed(ctx, kind)),
        }
    }

    fn failed(&self, mut ctx: CallContext, kind: GatewayError) -> OperationError {
        ctx.fail();
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        match &kind {
            GatewayError::Validation(reason) => warn!(%reason, "request rejected before sending"),
            other => error!(
                attempts = ctx.attempts(),
                ambiguous = other.is_ambiguous(),
                error = %other,
                "upstream operation failed"
            ),
        }
        OperationError {
            correlation_id: ctx.correlation_id,
            operation: ctx.operation,
            attempts: ctx.attempts(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audit::{AuditOutcome, MemoryAuditSink},
        clock::ManualClock,
        model::{
            CabinClass, ConfirmationStatus, ContactInfo, CancellationStatus, Passenger,
            PassengerCounts, PassengerType, PaymentDetails, PaymentMethod, TripType,
        },
        test_support::{init_test_logging, test_config},
        transport::mock_transport::{MockReply, MockTransport},
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use futures::future::join;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    const SEARCH_SAMPLE: &str = include_str!("../samples/search_response.json");

    struct Harness {
        gateway: TravelGateway,
        transport: Arc<MockTransport>,
        sink: Arc<MemoryAuditSink>,
    }

    fn harness() -> Harness {
        init_test_logging();
        let transport = Arc::new(MockTransport::new());
        transport.set_default(
            Operation::Authenticate,
            MockReply::ok(json!({ "Status": 1, "TokenId": "tok-live", "Error": { "ErrorCode": 0 } })),
        );
        let sink = Arc::new(MemoryAuditSink::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap());

        let gateway = TravelGateway::builder(test_config())
            .transport(transport.clone())
            .clock(Arc::new(clock))
            .audit_sink(sink.clone())
            .build()
            .unwrap();

        Harness {
            gateway,
            transport,
            sink,
        }
    }

    fn search_request(adults: u32, infants: u32) -> SearchRequest {
        SearchRequest {
            origin: "DEL".into(),
            destination: "BOM".into(),
            departure_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            return_date: Some(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()),
            passengers: PassengerCounts {
                adults,
                children: 0,
                infants,
            },
            cabin_class: Some(CabinClass::Economy),
            trip_type: TripType::RoundTrip,
            currency: None,
            direct_only: false,
        }
    }

    fn booking_request() -> BookingRequest {
        BookingRequest {
            trace_id: "7f3c2a9e-51d4-4c1b-9d0e-2b7a6c1f8e10".into(),
            result_index: "OB1".into(),
            passengers: vec![Passenger {
                passenger_type: PassengerType::Adult,
                title: "Ms".into(),
                first_name: "Ananya".into(),
                last_name: "Rao".into(),
                date_of_birth: None,
                nationality: Some("IN".into()),
                document: None,
            }],
            contact: ContactInfo {
                email: "ananya@example.com".into(),
                phone: "9876543210".into(),
                address_line: None,
                city: None,
                country_code: Some("IN".into()),
            },
            payment: PaymentDetails {
                method: PaymentMethod::AgencyCredit,
                card_number: None,
                amount: 7500.0,
                currency: "INR".into(),
            },
            is_international: false,
        }
    }

    fn itinerary() -> Value {
        json!({
            "BookingId": 1849302,
            "PNR": "QX7K2M",
            "Status": 1,
            "Fare": { "Currency": "INR", "BaseFare": 6200, "Tax": 1300, "PublishedFare": 7500 },
            "Passenger": [{ "PaxType": 1, "FirstName": "Ananya", "LastName": "Rao" }]
        })
    }

    #[tokio::test]
    async fn test_search_end_to_end() {
        let h = harness();
        h.transport.set_default(
            Operation::Search,
            MockReply::ok(serde_json::from_str(SEARCH_SAMPLE).unwrap()),
        );

        let correlation_id = Uuid::new_v4();
        let result = assert_ok!(
            h.gateway
                .search(
                    &search_request(2, 1),
                    CallOptions::default().with_correlation_id(correlation_id)
                )
                .await
        );

        assert_eq!(result.offers.len(), 5);
        assert_eq!(result.offers[0].price_total, 7500.00);
        assert_eq!(result.offers[0].currency, "INR");
        assert_eq!(result.trace_id, "7f3c2a9e-51d4-4c1b-9d0e-2b7a6c1f8e10");
        assert_eq!(
            result.expires_at - result.received_at,
            chrono::Duration::seconds(900)
        );

        let sent: Value = serde_json::from_slice(&h.transport.requests()[1].body).unwrap();
        assert_eq!(sent["TokenId"], "tok-live");
        assert_eq!(sent["Segments"].as_array().unwrap().len(), 2);

        let records = h.sink.for_correlation(correlation_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint, "Search");
        assert_eq!(records[0].request["TokenId"], crate::audit::REDACTED);
    }

    #[tokio::test]
    async fn test_invalid_search_never_reaches_network() {
        let h = harness();

        let err = assert_err!(h.gateway.search(&search_request(1, 2), CallOptions::default()).await);

        assert!(matches!(err.kind, GatewayError::Validation(_)));
        assert_eq!(err.operation, Operation::Search);
        assert_eq!(err.attempts, 0);
        assert_eq!(h.transport.request_count(), 0);
        assert_eq!(h.gateway.credentials().auth_calls(), 0);
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn test_booking_flow_shares_one_credential() {
        let h = harness();
        h.transport.set_default(
            Operation::FareQuote,
            MockReply::ok(json!({
                "Response": {
                    "TraceId": "7f3c2a9e-51d4-4c1b-9d0e-2b7a6c1f8e10",
                    "IsPriceChanged": false,
                    "Results": {
                        "ResultIndex": "OB1",
                        "IsRefundable": true,
                        "Fare": { "Currency": "INR", "BaseFare": 6200, "Tax": 1300, "PublishedFare": 7500 }
                    }
                }
            })),
        );
        h.transport.set_default(
            Operation::Book,
            MockReply::ok(json!({
                "Response": { "Response": { "PNR": "QX7K2M", "BookingId": 1849302, "Status": 1, "FlightItinerary": itinerary() } }
            })),
        );
        h.transport.set_default(
            Operation::BookingDetails,
            MockReply::ok(json!({ "Response": { "FlightItinerary": itinerary() } })),
        );
        h.transport.set_default(
            Operation::Cancel,
            MockReply::ok(json!({
                "Response": { "TicketCRInfo": [{ "ChangeRequestId": 55012, "ChangeRequestStatus": 1 }] }
            })),
        );

        let quote = assert_ok!(
            h.gateway
                .fare_quote(
                    &FareQuoteRequest {
                        trace_id: "7f3c2a9e-51d4-4c1b-9d0e-2b7a6c1f8e10".into(),
                        result_index: "OB1".into(),
                    },
                    CallOptions::default()
                )
                .await
        );
        assert!(!quote.price_changed);

        let confirmation = assert_ok!(h.gateway.book(&booking_request(), CallOptions::default()).await);
        assert_eq!(confirmation.booking_reference, "1849302");
        assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);

        let details = assert_ok!(
            h.gateway
                .booking_details(
                    &BookingDetailsRequest {
                        booking_reference: Some(confirmation.booking_reference.clone()),
                        carrier_locator: None,
                    },
                    CallOptions::default()
                )
                .await
        );
        assert_eq!(details.confirmation.carrier_locator.as_deref(), Some("QX7K2M"));

        let cancelled = assert_ok!(
            h.gateway
                .cancel(
                    &CancelRequest {
                        booking_reference: confirmation.booking_reference.clone(),
                        remarks: None,
                    },
                    CallOptions::default()
                )
                .await
        );
        assert_eq!(cancelled.status, CancellationStatus::Requested);

        assert_eq!(h.transport.calls(Operation::Authenticate), 1);
        let stats = h.gateway.stats();
        assert_eq!(stats.calls, 4);
        assert_eq!(stats.successes, 4);
        assert_eq!(stats.auth_calls, 1);
        // One authenticate record plus one per operation
        assert_eq!(h.sink.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_booking_timeout_surfaces_ambiguity() {
        let h = harness();
        h.transport.set_default(Operation::Book, MockReply::Hang);

        let err = assert_err!(h.gateway.book(&booking_request(), CallOptions::default()).await);

        assert!(err.is_ambiguous());
        assert!(!err.is_retryable());
        assert_eq!(err.attempts, 1);
        assert_eq!(h.transport.calls(Operation::Book), 1);

        let records = h.sink.for_correlation(err.correlation_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::FatalError);
        assert_eq!(h.gateway.stats().ambiguous_failures, 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_booking_rejected() {
        let h = harness();
        h.transport.set_delay(50);
        h.transport.set_default(
            Operation::Book,
            MockReply::ok(json!({
                "Response": { "Response": { "BookingId": 1849302, "Status": 1, "FlightItinerary": itinerary() } }
            })),
        );

        let request = booking_request();
        let (first, second) = join(
            h.gateway.book(&request, CallOptions::default()),
            h.gateway.book(&request, CallOptions::default()),
        )
        .await;

        assert_ok!(first);
        let err = assert_err!(second);
        assert!(matches!(err.kind, GatewayError::Validation(_)));
        assert_eq!(h.transport.calls(Operation::Book), 1);
        assert_eq!(h.gateway.stats().duplicate_bookings_rejected, 1);

        // Released once the first call finished
        assert_ok!(h.gateway.book(&request, CallOptions::default()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_is_distinct() {
        let h = harness();
        h.transport.set_default(Operation::Search, MockReply::Hang);

        let err = assert_err!(
            h.gateway
                .search(
                    &search_request(1, 0),
                    CallOptions::default().with_deadline(Duration::from_secs(5))
                )
                .await
        );

        assert_eq!(
            err.kind,
            GatewayError::DeadlineExceeded {
                attempts: 1,
                ambiguous: false
            }
        );
        assert_eq!(err.kind.suggested_status(), 504);
    }

    #[tokio::test]
    async fn test_malformed_response_is_fatal() {
        let h = harness();
        h.transport.set_default(
            Operation::Confirm,
            MockReply::ok(json!({ "Response": { "Response": { "TicketStatus": 1 } } })),
        );

        let err = assert_err!(
            h.gateway
                .confirm_booking(
                    &ConfirmRequest {
                        trace_id: "trace-1".into(),
                        booking_reference: "1849302".into(),
                        carrier_locator: "QX7K2M".into(),
                    },
                    CallOptions::default()
                )
                .await
        );

        assert!(matches!(err.kind, GatewayError::MalformedResponse(_)));
        assert_eq!(err.attempts, 1);
        assert_eq!(h.transport.calls(Operation::Confirm), 1);

        let records = h.sink.for_correlation(err.correlation_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::FatalError);
        assert_eq!(records[0].error, Some(err.kind.to_string()));
        assert!(records[0].response.is_some());
    }

    #[tokio::test]
    async fn test_authentication_failure_surfaces() {
        let h = harness();
        h.transport.set_default(Operation::Authenticate, MockReply::status(403));

        let err = assert_err!(h.gateway.search(&search_request(1, 0), CallOptions::default()).await);

        assert!(matches!(err.kind, GatewayError::Authentication { status: Some(403), .. }));
        assert_eq!(err.attempts, 0);
        assert_eq!(h.transport.calls(Operation::Search), 0);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = test_config();
        config.auth_url = String::new();
        assert!(matches!(
            TravelGateway::builder(config).build(),
            Err(ConfigError::Invalid(_))
        ));
    }
}
