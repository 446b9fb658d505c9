// Request normalizer
// Pure transforms from validated internal requests to the supplier's wire payloads.
// Bad input is rejected here, before a credential is fetched or a byte hits the network.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::GatewayError,
    model::{
        BookingDetailsRequest, BookingRequest, CabinClass, CancelRequest, ConfirmRequest,
        FareQuoteRequest, Operation, PassengerCounts, PassengerType, PaymentMethod,
        SearchRequest, TripType,
    },
};

// Supplier fields that hold secrets or personal document numbers
pub const SENSITIVE_FIELDS: &[&str] = &[
    "TokenId",
    "Password",
    "PassportNo",
    "CardNumber",
    "CVV",
];

const TOKEN_FIELD: &str = "TokenId";

// One outbound call, minus the credential
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamPayload {
    pub operation: Operation,
    pub body: Value,
}

impl UpstreamPayload {
    pub fn endpoint(&self) -> &'static str {
        endpoint_path(self.operation)
    }
}

pub fn endpoint_path(operation: Operation) -> &'static str {
    match operation {
        Operation::Authenticate => "Authenticate",
        Operation::Search => "Search",
        Operation::FareQuote => "FareQuote",
        Operation::FareRules => "FareRule",
        Operation::Book => "Book",
        Operation::Confirm => "Ticket",
        Operation::BookingDetails => "GetBookingDetails",
        Operation::Cancel => "SendChangeRequest",
    }
}

// Values the normalizers fill in when the caller leaves them out
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub end_user_ip: String,
    pub currency: String,
    pub cabin_class: CabinClass,
    pub max_passengers: u32,
    pub today: NaiveDate,
}

// Puts the credential where the supplier expects it
pub fn inject_credential(body: &mut Value, token: &str) {
    if let Value::Object(map) = body {
        map.insert(TOKEN_FIELD.to_string(), Value::String(token.to_string()));
    }
}

pub(crate) fn cabin_class_code(cabin: CabinClass) -> u8 {
    match cabin {
        CabinClass::Any => 1,
        CabinClass::Economy => 2,
        CabinClass::PremiumEconomy => 3,
        CabinClass::Business => 4,
        CabinClass::PremiumBusiness => 5,
        CabinClass::First => 6,
    }
}

fn pax_type_code(pax: PassengerType) -> u8 {
    match pax {
        PassengerType::Adult => 1,
        PassengerType::Child => 2,
        PassengerType::Infant => 3,
    }
}

fn supplier_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%dT00:00:00").to_string()
}

fn to_body<T: Serialize>(body: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(body)
        .map_err(|e| GatewayError::validation(format!("payload could not be encoded: {e}")))
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn airport_code(field: &str, value: &str) -> Result<String, GatewayError> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(GatewayError::validation(format!(
            "{field} must be a 3-letter location code, got {value:?}"
        )));
    }
    Ok(code)
}

fn currency_code(value: &str) -> Result<String, GatewayError> {
    let code = value.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(GatewayError::validation(format!(
            "currency must be an ISO 4217 code, got {value:?}"
        )));
    }
    Ok(code)
}

fn check_counts(counts: &PassengerCounts, max: u32) -> Result<(), GatewayError> {
    if counts.adults == 0 {
        return Err(GatewayError::validation("at least one adult is required"));
    }
    if counts.infants > counts.adults {
        return Err(GatewayError::validation(format!(
            "{} infant(s) but only {} adult(s); each infant needs an adult",
            counts.infants, counts.adults
        )));
    }
    let total = counts.total();
    if total > u64::from(max) {
        return Err(GatewayError::validation(format!(
            "{total} passengers exceeds the supplier maximum of {max}"
        )));
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticateBody<'a> {
    client_id: &'a str,
    user_name: &'a str,
    password: &'a str,
    end_user_ip: &'a str,
}

pub fn normalize_authenticate(
    client_id: &str,
    username: &str,
    password: &str,
    end_user_ip: &str,
) -> Result<UpstreamPayload, GatewayError> {
    let body = AuthenticateBody {
        client_id: required("client_id", client_id)?,
        user_name: required("username", username)?,
        password: required("password", password)?,
        end_user_ip,
    };
    Ok(UpstreamPayload {
        operation: Operation::Authenticate,
        body: to_body(&body)?,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SearchBody {
    end_user_ip: String,
    adult_count: u32,
    child_count: u32,
    infant_count: u32,
    direct_flight: bool,
    one_stop_flight: bool,
    journey_type: u8,
    preferred_currency: String,
    segments: Vec<SegmentBody>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SegmentBody {
    origin: String,
    destination: String,
    flight_cabin_class: u8,
    preferred_departure_time: String,
    preferred_arrival_time: String,
}

pub fn normalize_search(
    request: &SearchRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let origin = airport_code("origin", &request.origin)?;
    let destination = airport_code("destination", &request.destination)?;
    if origin == destination {
        return Err(GatewayError::validation(
            "origin and destination must differ",
        ));
    }

    check_counts(&request.passengers, defaults.max_passengers)?;

    if request.departure_date < defaults.today {
        return Err(GatewayError::validation(format!(
            "departure date {} is in the past",
            request.departure_date
        )));
    }

    let cabin = cabin_class_code(request.cabin_class.unwrap_or(defaults.cabin_class));
    let currency = match &request.currency {
        Some(c) => currency_code(c)?,
        None => defaults.currency.clone(),
    };

    let mut segments = vec![SegmentBody {
        origin: origin.clone(),
        destination: destination.clone(),
        flight_cabin_class: cabin,
        preferred_departure_time: supplier_date(request.departure_date),
        preferred_arrival_time: supplier_date(request.departure_date),
    }];

    // A return date on a one-way search is ignored
    if request.trip_type == TripType::RoundTrip {
        let return_date = request.return_date.ok_or_else(|| {
            GatewayError::validation("return date is required for a round trip")
        })?;
        if return_date < request.departure_date {
            return Err(GatewayError::validation(format!(
                "return date {} is before departure date {}",
                return_date, request.departure_date
            )));
        }
        segments.push(SegmentBody {
            origin: destination,
            destination: origin,
            flight_cabin_class: cabin,
            preferred_departure_time: supplier_date(return_date),
            preferred_arrival_time: supplier_date(return_date),
        });
    }

    let body = SearchBody {
        end_user_ip: defaults.end_user_ip.clone(),
        adult_count: request.passengers.adults,
        child_count: request.passengers.children,
        infant_count: request.passengers.infants,
        direct_flight: request.direct_only,
        one_stop_flight: false,
        journey_type: match request.trip_type {
            TripType::OneWay => 1,
            TripType::RoundTrip => 2,
        },
        preferred_currency: currency,
        segments,
    };

    Ok(UpstreamPayload {
        operation: Operation::Search,
        body: to_body(&body)?,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResultKeyBody<'a> {
    end_user_ip: &'a str,
    trace_id: &'a str,
    result_index: &'a str,
}

fn normalize_result_key(
    operation: Operation,
    request: &FareQuoteRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let body = ResultKeyBody {
        end_user_ip: &defaults.end_user_ip,
        trace_id: required("trace_id", &request.trace_id)?,
        result_index: required("result_index", &request.result_index)?,
    };
    Ok(UpstreamPayload {
        operation,
        body: to_body(&body)?,
    })
}

pub fn normalize_fare_quote(
    request: &FareQuoteRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    normalize_result_key(Operation::FareQuote, request, defaults)
}

pub fn normalize_fare_rules(
    request: &FareQuoteRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    normalize_result_key(Operation::FareRules, request, defaults)
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BookBody<'a> {
    end_user_ip: &'a str,
    trace_id: &'a str,
    result_index: &'a str,
    passengers: Vec<PassengerBody<'a>>,
    payment: PaymentBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PassengerBody<'a> {
    title: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    pax_type: u8,
    is_lead_pax: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nationality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passport_no: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passport_expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    passport_issuing_country: Option<&'a str>,
    email: &'a str,
    contact_no: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address_line1: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country_code: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PaymentBody<'a> {
    mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_number: Option<&'a str>,
    amount: f64,
    currency: String,
}

pub fn normalize_book(
    request: &BookingRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let trace_id = required("trace_id", &request.trace_id)?;
    let result_index = required("result_index", &request.result_index)?;

    if request.passengers.is_empty() {
        return Err(GatewayError::validation("at least one passenger is required"));
    }

    let mut counts = PassengerCounts::default();
    for p in &request.passengers {
        match p.passenger_type {
            PassengerType::Adult => counts.adults += 1,
            PassengerType::Child => counts.children += 1,
            PassengerType::Infant => counts.infants += 1,
        }
    }
    check_counts(&counts, defaults.max_passengers)?;

    let email = required("contact email", &request.contact.email)?;
    if !email.contains('@') {
        return Err(GatewayError::validation(format!(
            "contact email {email:?} is not an address"
        )));
    }
    let phone = required("contact phone", &request.contact.phone)?;

    let mut lead_assigned = false;
    let mut passengers = Vec::with_capacity(request.passengers.len());
    for (i, p) in request.passengers.iter().enumerate() {
        let first_name = required(&format!("passengers[{i}].first_name"), &p.first_name)?;
        let last_name = required(&format!("passengers[{i}].last_name"), &p.last_name)?;

        if p.passenger_type != PassengerType::Adult && p.date_of_birth.is_none() {
            return Err(GatewayError::validation(format!(
                "passengers[{i}]: date of birth is required for children and infants"
            )));
        }
        if let Some(dob) = p.date_of_birth {
            if dob > defaults.today {
                return Err(GatewayError::validation(format!(
                    "passengers[{i}]: date of birth {dob} is in the future"
                )));
            }
        }

        let document = match (&p.document, request.is_international) {
            (None, true) => {
                return Err(GatewayError::validation(format!(
                    "passengers[{i}]: travel document is required for international itineraries"
                )))
            }
            (Some(doc), _) => {
                required(&format!("passengers[{i}].document.number"), &doc.number)?;
                if doc.expiry < defaults.today {
                    return Err(GatewayError::validation(format!(
                        "passengers[{i}]: travel document expired on {}",
                        doc.expiry
                    )));
                }
                Some(doc)
            }
            (None, false) => None,
        };

        let is_lead = !lead_assigned && p.passenger_type == PassengerType::Adult;
        lead_assigned |= is_lead;

        passengers.push(PassengerBody {
            title: p.title.trim(),
            first_name,
            last_name,
            pax_type: pax_type_code(p.passenger_type),
            is_lead_pax: is_lead,
            date_of_birth: p.date_of_birth.map(supplier_date),
            nationality: p.nationality.as_deref(),
            passport_no: document.map(|d| d.number.as_str()),
            passport_expiry: document.map(|d| supplier_date(d.expiry)),
            passport_issuing_country: document.map(|d| d.issuing_country.as_str()),
            email,
            contact_no: phone,
            address_line1: request.contact.address_line.as_deref(),
            city: request.contact.city.as_deref(),
            country_code: request.contact.country_code.as_deref(),
        });
    }

    let payment = &request.payment;
    if !(payment.amount > 0.0) {
        return Err(GatewayError::validation("payment amount must be positive"));
    }
    let card_number = match payment.method {
        PaymentMethod::Card => Some(required("card number", payment.card_number.as_deref().unwrap_or(""))?),
        PaymentMethod::AgencyCredit => None,
    };

    let body = BookBody {
        end_user_ip: &defaults.end_user_ip,
        trace_id,
        result_index,
        passengers,
        payment: PaymentBody {
            mode: match payment.method {
                PaymentMethod::AgencyCredit => "Credit",
                PaymentMethod::Card => "Card",
            },
            card_number,
            amount: payment.amount,
            currency: currency_code(&payment.currency)?,
        },
    };

    Ok(UpstreamPayload {
        operation: Operation::Book,
        body: to_body(&body)?,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TicketBody<'a> {
    end_user_ip: &'a str,
    trace_id: &'a str,
    booking_id: &'a str,
    #[serde(rename = "PNR")]
    pnr: &'a str,
}

pub fn normalize_confirm(
    request: &ConfirmRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let body = TicketBody {
        end_user_ip: &defaults.end_user_ip,
        trace_id: required("trace_id", &request.trace_id)?,
        booking_id: required("booking_reference", &request.booking_reference)?,
        pnr: required("carrier_locator", &request.carrier_locator)?,
    };
    Ok(UpstreamPayload {
        operation: Operation::Confirm,
        body: to_body(&body)?,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BookingDetailsBody<'a> {
    end_user_ip: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    booking_id: Option<&'a str>,
    #[serde(rename = "PNR", skip_serializing_if = "Option::is_none")]
    pnr: Option<&'a str>,
}

pub fn normalize_booking_details(
    request: &BookingDetailsRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let booking_id = request
        .booking_reference
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let pnr = request
        .carrier_locator
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if booking_id.is_none() && pnr.is_none() {
        return Err(GatewayError::validation(
            "booking_reference or carrier_locator is required",
        ));
    }

    let body = BookingDetailsBody {
        end_user_ip: &defaults.end_user_ip,
        booking_id,
        pnr,
    };
    Ok(UpstreamPayload {
        operation: Operation::BookingDetails,
        body: to_body(&body)?,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeRequestBody<'a> {
    end_user_ip: &'a str,
    booking_id: &'a str,
    // 1 = full cancellation
    request_type: u8,
    remarks: &'a str,
}

pub fn normalize_cancel(
    request: &CancelRequest,
    defaults: &RequestDefaults,
) -> Result<UpstreamPayload, GatewayError> {
    let body = ChangeRequestBody {
        end_user_ip: &defaults.end_user_ip,
        booking_id: required("booking_reference", &request.booking_reference)?,
        request_type: 1,
        remarks: request
            .remarks
            .as_deref()
            .unwrap_or("Cancelled by customer"),
    };
    Ok(UpstreamPayload {
        operation: Operation::Cancel,
        body: to_body(&body)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContactInfo, DocumentInfo, Passenger, PaymentDetails};

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            end_user_ip: "10.0.0.1".to_string(),
            currency: "INR".to_string(),
            cabin_class: CabinClass::Economy,
            max_passengers: 9,
            today: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        }
    }

    fn search(trip_type: TripType, counts: PassengerCounts) -> SearchRequest {
        SearchRequest {
            origin: "del".to_string(),
            destination: "BOM".to_string(),
            departure_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            return_date: Some(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()),
            passengers: counts,
            cabin_class: None,
            trip_type,
            currency: None,
            direct_only: false,
        }
    }

    fn counts(adults: u32, children: u32, infants: u32) -> PassengerCounts {
        PassengerCounts {
            adults,
            children,
            infants,
        }
    }

    fn passenger(passenger_type: PassengerType, dob: Option<NaiveDate>) -> Passenger {
        Passenger {
            passenger_type,
            title: "Mr".into(),
            first_name: "Arjun".into(),
            last_name: "Mehta".into(),
            date_of_birth: dob,
            nationality: Some("IN".into()),
            document: Some(DocumentInfo {
                number: "Z1234567".into(),
                expiry: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                issuing_country: "IN".into(),
            }),
        }
    }

    fn booking(passengers: Vec<Passenger>) -> BookingRequest {
        BookingRequest {
            trace_id: "trace-1".into(),
            result_index: "OB1".into(),
            passengers,
            contact: ContactInfo {
                email: "arjun@example.com".into(),
                phone: "9999999999".into(),
                address_line: None,
                city: Some("Delhi".into()),
                country_code: Some("IN".into()),
            },
            payment: PaymentDetails {
                method: PaymentMethod::AgencyCredit,
                card_number: None,
                amount: 7500.0,
                currency: "inr".into(),
            },
            is_international: true,
        }
    }

    #[test]
    fn test_segment_count_follows_trip_type() {
        let one_way = normalize_search(&search(TripType::OneWay, counts(1, 0, 0)), &defaults()).unwrap();
        assert_eq!(one_way.body["Segments"].as_array().unwrap().len(), 1);
        assert_eq!(one_way.body["JourneyType"], 1);

        let round = normalize_search(&search(TripType::RoundTrip, counts(1, 0, 0)), &defaults()).unwrap();
        let segments = round.body["Segments"].as_array().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1]["Origin"], "BOM");
        assert_eq!(segments[1]["Destination"], "DEL");
        assert_eq!(segments[1]["PreferredDepartureTime"], "2025-06-15T00:00:00");
    }

    #[test]
    fn test_passenger_counts_sum_exactly() {
        for (a, c, i) in [(1, 0, 0), (2, 3, 2), (4, 0, 4), (3, 6, 0), (5, 2, 2)] {
            let payload =
                normalize_search(&search(TripType::OneWay, counts(a, c, i)), &defaults()).unwrap();
            let body = &payload.body;
            let sum = body["AdultCount"].as_u64().unwrap()
                + body["ChildCount"].as_u64().unwrap()
                + body["InfantCount"].as_u64().unwrap();
            assert_eq!(sum, (a + c + i) as u64);
            assert_eq!(body["AdultCount"], a);
            assert_eq!(body["InfantCount"], i);
        }
    }

    #[test]
    fn test_defaults_fill_cabin_and_currency() {
        let payload = normalize_search(&search(TripType::OneWay, counts(1, 0, 0)), &defaults()).unwrap();
        assert_eq!(payload.body["PreferredCurrency"], "INR");
        assert_eq!(payload.body["Segments"][0]["FlightCabinClass"], 2);
        assert_eq!(payload.body["Segments"][0]["Origin"], "DEL");
        assert_eq!(payload.endpoint(), "Search");
    }

    #[test]
    fn test_search_validation_failures() {
        let d = defaults();

        let err = normalize_search(&search(TripType::OneWay, counts(1, 0, 2)), &d).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        assert!(normalize_search(&search(TripType::OneWay, counts(5, 3, 2)), &d).is_err());
        assert!(normalize_search(&search(TripType::OneWay, counts(0, 1, 0)), &d).is_err());

        let mut past = search(TripType::OneWay, counts(1, 0, 0));
        past.departure_date = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        assert!(normalize_search(&past, &d).is_err());

        let mut no_return = search(TripType::RoundTrip, counts(1, 0, 0));
        no_return.return_date = None;
        assert!(normalize_search(&no_return, &d).is_err());

        let mut backwards = search(TripType::RoundTrip, counts(1, 0, 0));
        backwards.return_date = NaiveDate::from_ymd_opt(2025, 6, 9);
        assert!(normalize_search(&backwards, &d).is_err());

        let mut same = search(TripType::OneWay, counts(1, 0, 0));
        same.destination = "DEL".into();
        assert!(normalize_search(&same, &d).is_err());

        let mut bad_code = search(TripType::OneWay, counts(1, 0, 0));
        bad_code.origin = "DELHI".into();
        assert!(normalize_search(&bad_code, &d).is_err());
    }

    #[test]
    fn test_huge_passenger_counts_do_not_wrap() {
        let d = defaults();

        let err = normalize_search(&search(TripType::OneWay, counts(u32::MAX, 1, 0)), &d).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let err =
            normalize_search(&search(TripType::OneWay, counts(u32::MAX, u32::MAX, u32::MAX)), &d)
                .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(counts(u32::MAX, u32::MAX, u32::MAX).total(), 3 * u64::from(u32::MAX));
    }

    #[test]
    fn test_inject_credential() {
        let mut payload = normalize_fare_quote(
            &FareQuoteRequest {
                trace_id: "t".into(),
                result_index: "r".into(),
            },
            &defaults(),
        )
        .unwrap();
        inject_credential(&mut payload.body, "tok-1");
        assert_eq!(payload.body["TokenId"], "tok-1");
        assert_eq!(payload.body["ResultIndex"], "r");
    }

    #[test]
    fn test_normalize_book_marks_single_lead() {
        let request = booking(vec![
            passenger(PassengerType::Adult, None),
            passenger(PassengerType::Adult, None),
            passenger(PassengerType::Infant, NaiveDate::from_ymd_opt(2024, 9, 1)),
        ]);
        let payload = normalize_book(&request, &defaults()).unwrap();
        let pax = payload.body["Passengers"].as_array().unwrap();

        assert_eq!(pax.len(), 3);
        assert_eq!(pax[0]["IsLeadPax"], true);
        assert_eq!(pax[1]["IsLeadPax"], false);
        assert_eq!(pax[2]["PaxType"], 3);
        assert_eq!(pax[2]["DateOfBirth"], "2024-09-01T00:00:00");
        assert_eq!(payload.body["Payment"]["Currency"], "INR");
        assert_eq!(payload.body["Payment"]["Mode"], "Credit");
    }

    #[test]
    fn test_normalize_book_rejects_missing_documents_and_dob() {
        let d = defaults();

        let mut no_doc = booking(vec![passenger(PassengerType::Adult, None)]);
        no_doc.passengers[0].document = None;
        assert!(normalize_book(&no_doc, &d).is_err());
        no_doc.is_international = false;
        assert!(normalize_book(&no_doc, &d).is_ok());

        let child_without_dob = booking(vec![
            passenger(PassengerType::Adult, None),
            passenger(PassengerType::Child, None),
        ]);
        assert!(normalize_book(&child_without_dob, &d).is_err());

        let infants_only = booking(vec![passenger(
            PassengerType::Infant,
            NaiveDate::from_ymd_opt(2024, 9, 1),
        )]);
        assert!(normalize_book(&infants_only, &d).is_err());

        let mut card_without_number = booking(vec![passenger(PassengerType::Adult, None)]);
        card_without_number.payment.method = PaymentMethod::Card;
        assert!(normalize_book(&card_without_number, &d).is_err());
    }

    #[test]
    fn test_booking_details_needs_a_key() {
        let d = defaults();
        assert!(normalize_booking_details(&BookingDetailsRequest::default(), &d).is_err());

        let payload = normalize_booking_details(
            &BookingDetailsRequest {
                booking_reference: None,
                carrier_locator: Some("ABC123".into()),
            },
            &d,
        )
        .unwrap();
        assert_eq!(payload.body["PNR"], "ABC123");
        assert!(payload.body.get("BookingId").is_none());
    }
}
