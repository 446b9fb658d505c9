// Internal, supplier-agnostic types
// Nothing in here knows a supplier field name. Upstream shapes live in request.rs and response.rs.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Authenticate,
    Search,
    FareQuote,
    FareRules,
    Book,
    Confirm,
    BookingDetails,
    Cancel,
}

impl Operation {
    // Safe to send twice without creating a second side-effect upstream
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Operation::Book | Operation::Confirm | Operation::Cancel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Authenticate => "authenticate",
            Operation::Search => "search",
            Operation::FareQuote => "fare_quote",
            Operation::FareRules => "fare_rules",
            Operation::Book => "book",
            Operation::Confirm => "confirm",
            Operation::BookingDetails => "booking_details",
            Operation::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    Any,
    #[default]
    Economy,
    PremiumEconomy,
    Business,
    PremiumBusiness,
    First,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    #[default]
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerCounts {
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
}

impl PassengerCounts {
    // Widened so absurd counts cannot wrap past the passenger limit
    pub fn total(&self) -> u64 {
        u64::from(self.adults) + u64::from(self.children) + u64::from(self.infants)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub passengers: PassengerCounts,
    // Falls back to the configured default
    pub cabin_class: Option<CabinClass>,
    pub trip_type: TripType,
    pub currency: Option<String>,
    pub direct_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfferSubject {
    Flight {
        carrier: String,
        flight_number: String,
    },
    Hotel {
        property_code: String,
        room: Option<String>,
    },
}

// One priced, bookable option. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: String,
    pub subject: OfferSubject,
    pub price_total: f64,
    pub currency: String,
    pub fare_basis: Option<String>,
    pub is_refundable: bool,
    pub cabin_class: Option<CabinClass>,
    // 0 for outbound, 1 for the return leg
    pub leg: u8,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub departs_at: Option<NaiveDateTime>,
    pub arrives_at: Option<NaiveDateTime>,
    pub stops: u32,
    // Opaque supplier keys, kept verbatim for fare quote and booking
    pub result_index: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub trace_id: String,
    pub offers: Vec<Offer>,
    pub received_at: DateTime<Utc>,
    // Hint only; the supplier session usually dies around here
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuoteRequest {
    pub trace_id: String,
    pub result_index: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRule {
    pub origin: String,
    pub destination: String,
    pub airline: String,
    pub fare_basis: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub trace_id: String,
    pub result_index: String,
    pub price_total: f64,
    pub base_fare: f64,
    pub taxes: f64,
    pub currency: String,
    pub is_refundable: bool,
    // Supplier repriced since the search
    pub price_changed: bool,
    pub last_ticket_date: Option<String>,
    pub fare_rules: Vec<FareRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassengerType {
    Adult,
    Child,
    Infant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub number: String,
    pub expiry: NaiveDate,
    pub issuing_country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub passenger_type: PassengerType,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub document: Option<DocumentInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    pub phone: String,
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    // Settled against the agency credit line
    AgencyCredit,
    Card,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub method: PaymentMethod,
    pub card_number: Option<String>,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub trace_id: String,
    pub result_index: String,
    // The first adult is the lead passenger
    pub passengers: Vec<Passenger>,
    pub contact: ContactInfo,
    pub payment: PaymentDetails,
    pub is_international: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charges {
    pub total: f64,
    pub base_fare: f64,
    pub taxes: f64,
    pub currency: String,
}

// Snapshot of a booking at the time the supplier answered. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub booking_reference: String,
    pub status: ConfirmationStatus,
    pub carrier_locator: Option<String>,
    pub ticket_numbers: Vec<String>,
    pub charges: Charges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub trace_id: String,
    pub booking_reference: String,
    pub carrier_locator: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingDetailsRequest {
    pub booking_reference: Option<String>,
    pub carrier_locator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerSummary {
    pub passenger_type: PassengerType,
    pub first_name: String,
    pub last_name: String,
    pub ticket_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub confirmation: BookingConfirmation,
    pub passengers: Vec<PassengerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub booking_reference: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStatus {
    Requested,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub booking_reference: String,
    pub status: CancellationStatus,
    pub change_request_id: Option<String>,
    pub refund_amount: Option<f64>,
    pub cancellation_charge: Option<f64>,
}
