// Response normalizer
// The supplier is loose about types (numbers as strings, booleans as 0/1/"true") and about
// which fields are present. Everything is read through Option + lenient helpers here, and
// only the fields a later call depends on are treated as required.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    credential::{Credential, MAX_TTL_SECONDS},
    error::GatewayError,
    model::{
        BookingConfirmation, BookingDetails, CabinClass, CancellationResult, CancellationStatus,
        Charges, ConfirmationStatus, FareQuote, FareRule, Offer, OfferSubject, PassengerSummary,
        PassengerType, SearchResult,
    },
};

// Error codes the supplier uses for an expired or unknown token
const SESSION_FAULT_CODES: &[&str] = &["6", "InvalidSession", "TokenExpired"];

// Business error carried inside an otherwise successful HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFault {
    pub code: String,
    pub message: String,
}

impl UpstreamFault {
    pub fn is_session_expired(&self) -> bool {
        SESSION_FAULT_CODES.contains(&self.code.as_str())
    }
}

pub fn embedded_error(body: &Value) -> Option<UpstreamFault> {
    let candidates = [
        body.get("Response").and_then(|r| r.get("Error")),
        body.get("Error"),
    ];

    for err in candidates.into_iter().flatten() {
        let code = match err.get("ErrorCode") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.trim().to_string(),
            _ => continue,
        };
        if code.is_empty() || code == "0" {
            continue;
        }
        let message = err
            .get("ErrorMessage")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Some(UpstreamFault { code, message });
    }

    None
}

fn loose_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Some(true),
            "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn loose_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn loose_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn loose_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn need<T>(value: Option<T>, what: &str) -> Result<T, GatewayError> {
    value.ok_or_else(|| GatewayError::malformed(format!("missing {what}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_time(value: Option<&str>) -> Option<NaiveDateTime> {
    value.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
}

pub(crate) fn cabin_from_code(code: i64) -> Option<CabinClass> {
    match code {
        1 => Some(CabinClass::Any),
        2 => Some(CabinClass::Economy),
        3 => Some(CabinClass::PremiumEconomy),
        4 => Some(CabinClass::Business),
        5 => Some(CabinClass::PremiumBusiness),
        6 => Some(CabinClass::First),
        _ => None,
    }
}

fn pax_type_from_code(code: Option<i64>) -> PassengerType {
    match code {
        Some(2) => PassengerType::Child,
        Some(3) => PassengerType::Infant,
        _ => PassengerType::Adult,
    }
}

fn booking_status(code: Option<i64>) -> ConfirmationStatus {
    match code {
        Some(1) => ConfirmationStatus::Confirmed,
        Some(2) => ConfirmationStatus::Failed,
        _ => ConfirmationStatus::Pending,
    }
}

fn ticket_status(code: Option<i64>) -> ConfirmationStatus {
    match code {
        // issued, or already issued by an earlier call
        Some(1) | Some(6) => ConfirmationStatus::Confirmed,
        Some(5) | Some(8) | None => ConfirmationStatus::Pending,
        Some(_) => ConfirmationStatus::Failed,
    }
}

fn cancellation_status(code: Option<i64>) -> CancellationStatus {
    match code {
        Some(4) | Some(6) => CancellationStatus::Cancelled,
        Some(5) => CancellationStatus::Rejected,
        _ => CancellationStatus::Requested,
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Response")]
    response: Option<T>,
}

fn open<'a, T: Deserialize<'a>>(body: &'a Value, what: &str) -> Result<T, GatewayError> {
    let envelope = Envelope::<T>::deserialize(body)
        .map_err(|e| GatewayError::malformed(format!("{what} response: {e}")))?;
    envelope
        .response
        .ok_or_else(|| GatewayError::malformed(format!("{what} response has no Response object")))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierFare {
    currency: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    base_fare: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    tax: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    published_fare: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    offered_fare: Option<f64>,
}

impl SupplierFare {
    fn total(&self) -> Option<f64> {
        self.published_fare.or(self.offered_fare)
    }

    fn charges(&self) -> Result<Charges, GatewayError> {
        Ok(Charges {
            total: need(self.total(), "Fare.PublishedFare")?,
            base_fare: self.base_fare.unwrap_or_default(),
            taxes: self.tax.unwrap_or_default(),
            currency: need(non_empty(self.currency.clone()), "Fare.Currency")?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierAirline {
    airline_code: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    flight_number: Option<String>,
    fare_class: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierAirport {
    airport_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SegmentPoint {
    airport: Option<SupplierAirport>,
    dep_time: Option<String>,
    arr_time: Option<String>,
}

impl SegmentPoint {
    fn code(&self) -> Option<String> {
        self.airport.as_ref().and_then(|a| a.airport_code.clone())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierSegment {
    airline: Option<SupplierAirline>,
    origin: Option<SegmentPoint>,
    destination: Option<SegmentPoint>,
    #[serde(default, deserialize_with = "loose_i64")]
    cabin_class: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FlightResult {
    #[serde(default, deserialize_with = "loose_string")]
    result_index: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_refundable: Option<bool>,
    fare: Option<SupplierFare>,
    segments: Option<Vec<Vec<SupplierSegment>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HotelPrice {
    currency_code: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    published_price: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    offered_price: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HotelResult {
    #[serde(default, deserialize_with = "loose_string")]
    result_index: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    hotel_code: Option<String>,
    room_type_name: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_refundable: Option<bool>,
    price: Option<HotelPrice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchBody {
    trace_id: Option<String>,
    // One inner list per leg: outbound first, then return
    results: Option<Vec<Vec<FlightResult>>>,
    hotel_results: Option<Vec<HotelResult>>,
}

fn flight_offer(result: FlightResult, leg: u8, trace_id: &str) -> Result<Offer, GatewayError> {
    let result_index = need(result.result_index, "ResultIndex")?;
    let fare = need(result.fare, "Fare")?;
    let groups = need(result.segments, "Segments")?;
    let segments = groups
        .into_iter()
        .next()
        .filter(|g| !g.is_empty())
        .ok_or_else(|| GatewayError::malformed(format!("offer {result_index} has no segments")))?;

    let first = &segments[0];
    let last = &segments[segments.len() - 1];
    let airline = need(first.airline.as_ref(), "Segments.Airline")?;

    Ok(Offer {
        id: result_index.clone(),
        subject: OfferSubject::Flight {
            carrier: need(airline.airline_code.clone(), "Airline.AirlineCode")?,
            flight_number: need(airline.flight_number.clone(), "Airline.FlightNumber")?,
        },
        price_total: need(fare.total(), "Fare.PublishedFare")?,
        currency: need(non_empty(fare.currency), "Fare.Currency")?,
        fare_basis: airline.fare_class.clone(),
        is_refundable: result.is_refundable.unwrap_or(false),
        cabin_class: first.cabin_class.and_then(cabin_from_code),
        leg,
        origin: first.origin.as_ref().and_then(SegmentPoint::code),
        destination: last.destination.as_ref().and_then(SegmentPoint::code),
        departs_at: parse_time(first.origin.as_ref().and_then(|p| p.dep_time.as_deref())),
        arrives_at: parse_time(last.destination.as_ref().and_then(|p| p.arr_time.as_deref())),
        stops: (segments.len() - 1) as u32,
        result_index,
        trace_id: trace_id.to_string(),
    })
}

fn hotel_offer(result: HotelResult, trace_id: &str) -> Result<Offer, GatewayError> {
    let result_index = need(result.result_index, "ResultIndex")?;
    let price = need(result.price, "Price")?;

    Ok(Offer {
        id: result_index.clone(),
        subject: OfferSubject::Hotel {
            property_code: need(result.hotel_code, "HotelCode")?,
            room: result.room_type_name,
        },
        price_total: need(
            price.published_price.or(price.offered_price),
            "Price.PublishedPrice",
        )?,
        currency: need(non_empty(price.currency_code), "Price.CurrencyCode")?,
        fare_basis: None,
        is_refundable: result.is_refundable.unwrap_or(false),
        cabin_class: None,
        leg: 0,
        origin: None,
        destination: None,
        departs_at: None,
        arrives_at: None,
        stops: 0,
        result_index,
        trace_id: trace_id.to_string(),
    })
}

pub fn normalize_search_response(
    body: &Value,
    received_at: DateTime<Utc>,
    trace_ttl: Duration,
) -> Result<SearchResult, GatewayError> {
    let response: SearchBody = open(body, "search")?;
    let trace_id = need(non_empty(response.trace_id), "TraceId")?;

    if response.results.is_none() && response.hotel_results.is_none() {
        return Err(GatewayError::malformed("search response has no Results"));
    }

    let mut offers = Vec::new();
    for (leg, group) in response.results.into_iter().flatten().enumerate() {
        for result in group {
            let leg = u8::try_from(leg)
                .map_err(|_| GatewayError::malformed(format!("search response has {} legs", leg + 1)))?;
            offers.push(flight_offer(result, leg, &trace_id)?);
        }
    }
    for result in response.hotel_results.into_iter().flatten() {
        offers.push(hotel_offer(result, &trace_id)?);
    }

    Ok(SearchResult {
        trace_id,
        offers,
        received_at,
        expires_at: received_at + trace_ttl,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierFareRule {
    origin: Option<String>,
    destination: Option<String>,
    airline: Option<String>,
    fare_basis_code: Option<String>,
    fare_rule_detail: Option<String>,
}

impl From<SupplierFareRule> for FareRule {
    fn from(rule: SupplierFareRule) -> Self {
        FareRule {
            origin: rule.origin.unwrap_or_default(),
            destination: rule.destination.unwrap_or_default(),
            airline: rule.airline.unwrap_or_default(),
            fare_basis: rule.fare_basis_code,
            detail: rule.fare_rule_detail.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FareQuoteResult {
    #[serde(default, deserialize_with = "loose_string")]
    result_index: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_refundable: Option<bool>,
    fare: Option<SupplierFare>,
    last_ticket_date: Option<String>,
    fare_rules: Option<Vec<SupplierFareRule>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FareQuoteBody {
    trace_id: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_price_changed: Option<bool>,
    results: Option<FareQuoteResult>,
}

pub fn normalize_fare_quote_response(body: &Value) -> Result<FareQuote, GatewayError> {
    let response: FareQuoteBody = open(body, "fare quote")?;
    let result = need(response.results, "Results")?;
    let fare = need(result.fare, "Fare")?;
    let charges = fare.charges()?;

    Ok(FareQuote {
        trace_id: need(non_empty(response.trace_id), "TraceId")?,
        result_index: need(result.result_index, "ResultIndex")?,
        price_total: charges.total,
        base_fare: charges.base_fare,
        taxes: charges.taxes,
        currency: charges.currency,
        is_refundable: result.is_refundable.unwrap_or(false),
        price_changed: response.is_price_changed.unwrap_or(false),
        last_ticket_date: result.last_ticket_date,
        fare_rules: result
            .fare_rules
            .unwrap_or_default()
            .into_iter()
            .map(FareRule::from)
            .collect(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FareRulesBody {
    fare_rules: Option<Vec<SupplierFareRule>>,
}

pub fn normalize_fare_rules_response(body: &Value) -> Result<Vec<FareRule>, GatewayError> {
    let response: FareRulesBody = open(body, "fare rules")?;
    Ok(need(response.fare_rules, "FareRules")?
        .into_iter()
        .map(FareRule::from)
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierTicket {
    #[serde(default, deserialize_with = "loose_string")]
    ticket_number: Option<String>,
}

// Document numbers are deliberately not read, so they cannot leak into results
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SupplierPassenger {
    #[serde(default, deserialize_with = "loose_i64")]
    pax_type: Option<i64>,
    first_name: Option<String>,
    last_name: Option<String>,
    ticket: Option<SupplierTicket>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Itinerary {
    #[serde(default, deserialize_with = "loose_string")]
    booking_id: Option<String>,
    #[serde(rename = "PNR")]
    pnr: Option<String>,
    #[serde(default, deserialize_with = "loose_i64")]
    status: Option<i64>,
    fare: Option<SupplierFare>,
    passenger: Option<Vec<SupplierPassenger>>,
}

impl Itinerary {
    fn ticket_numbers(&self) -> Vec<String> {
        self.passenger
            .iter()
            .flatten()
            .filter_map(|p| p.ticket.as_ref().and_then(|t| t.ticket_number.clone()))
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BookingResult {
    #[serde(default, deserialize_with = "loose_string")]
    booking_id: Option<String>,
    #[serde(rename = "PNR")]
    pnr: Option<String>,
    #[serde(default, deserialize_with = "loose_i64")]
    status: Option<i64>,
    #[serde(default, deserialize_with = "loose_i64")]
    ticket_status: Option<i64>,
    flight_itinerary: Option<Itinerary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BookingBody {
    response: Option<BookingResult>,
}

fn booking_confirmation(
    body: &Value,
    what: &str,
    status: fn(&BookingResult) -> ConfirmationStatus,
) -> Result<BookingConfirmation, GatewayError> {
    let outer: BookingBody = open(body, what)?;
    let result = need(outer.response, "Response.Response")?;
    let itinerary = result.flight_itinerary.as_ref();

    let booking_reference = need(
        result
            .booking_id
            .clone()
            .or_else(|| itinerary.and_then(|i| i.booking_id.clone())),
        "BookingId",
    )?;
    let charges = need(itinerary.and_then(|i| i.fare.as_ref()), "FlightItinerary.Fare")?
        .charges()?;

    Ok(BookingConfirmation {
        booking_reference,
        status: status(&result),
        carrier_locator: non_empty(
            result
                .pnr
                .clone()
                .or_else(|| itinerary.and_then(|i| i.pnr.clone())),
        ),
        ticket_numbers: itinerary.map(Itinerary::ticket_numbers).unwrap_or_default(),
        charges,
    })
}

pub fn normalize_book_response(body: &Value) -> Result<BookingConfirmation, GatewayError> {
    booking_confirmation(body, "book", |r: &BookingResult| {
        booking_status(r.status.or(r.flight_itinerary.as_ref().and_then(|i| i.status)))
    })
}

pub fn normalize_confirm_response(body: &Value) -> Result<BookingConfirmation, GatewayError> {
    booking_confirmation(body, "ticket", |r: &BookingResult| {
        ticket_status(r.ticket_status)
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BookingDetailsBody {
    flight_itinerary: Option<Itinerary>,
}

pub fn normalize_booking_details_response(body: &Value) -> Result<BookingDetails, GatewayError> {
    let response: BookingDetailsBody = open(body, "booking details")?;
    let itinerary = need(response.flight_itinerary, "FlightItinerary")?;

    let confirmation = BookingConfirmation {
        booking_reference: need(itinerary.booking_id.clone(), "FlightItinerary.BookingId")?,
        status: booking_status(itinerary.status),
        carrier_locator: non_empty(itinerary.pnr.clone()),
        ticket_numbers: itinerary.ticket_numbers(),
        charges: need(itinerary.fare.as_ref(), "FlightItinerary.Fare")?.charges()?,
    };

    let passengers = itinerary
        .passenger
        .unwrap_or_default()
        .into_iter()
        .map(|p| PassengerSummary {
            passenger_type: pax_type_from_code(p.pax_type),
            first_name: p.first_name.unwrap_or_default(),
            last_name: p.last_name.unwrap_or_default(),
            ticket_number: p.ticket.and_then(|t| t.ticket_number),
        })
        .collect();

    Ok(BookingDetails {
        confirmation,
        passengers,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeRequestInfo {
    #[serde(default, deserialize_with = "loose_string")]
    change_request_id: Option<String>,
    #[serde(default, deserialize_with = "loose_i64")]
    change_request_status: Option<i64>,
    #[serde(default, deserialize_with = "loose_f64")]
    refunded_amount: Option<f64>,
    #[serde(default, deserialize_with = "loose_f64")]
    cancellation_charge: Option<f64>,
}

#[derive(Deserialize)]
struct CancelBody {
    #[serde(rename = "TicketCRInfo")]
    ticket_cr_info: Option<Vec<ChangeRequestInfo>>,
}

pub fn normalize_cancel_response(
    body: &Value,
    booking_reference: &str,
) -> Result<CancellationResult, GatewayError> {
    let response: CancelBody = open(body, "cancel")?;
    let info = need(response.ticket_cr_info, "TicketCRInfo")?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::malformed("cancel response has an empty TicketCRInfo"))?;

    Ok(CancellationResult {
        booking_reference: booking_reference.to_string(),
        status: cancellation_status(info.change_request_status),
        change_request_id: info.change_request_id,
        refund_amount: info.refunded_amount,
        cancellation_charge: info.cancellation_charge,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticateBody {
    #[serde(default, deserialize_with = "loose_string")]
    token_id: Option<String>,
    #[serde(default, deserialize_with = "loose_i64")]
    expires_in: Option<i64>,
}

// The supplier rarely says how long a token lives; the configured TTL fills in
pub fn normalize_authenticate_response(
    body: &Value,
    issued_at: DateTime<Utc>,
    default_ttl_seconds: i64,
) -> Result<Credential, GatewayError> {
    let response = AuthenticateBody::deserialize(body)
        .map_err(|e| GatewayError::malformed(format!("authenticate response: {e}")))?;

    Ok(Credential {
        token: need(response.token_id, "TokenId")?,
        issued_at,
        ttl_seconds: response
            .expires_in
            .filter(|ttl| *ttl > 0)
            .unwrap_or(default_ttl_seconds)
            .min(MAX_TTL_SECONDS),
    })
}
