//! `reply_to_hls` exchange of HLS passes 3 and 4
//!
//! The client sends f(StoC) as the parameter of method 1 of the current
//! association object; the server returns f(CtoS) in the action response.

use dlms_core::{DlmsError, DlmsResult};

/// Association LN interface class
pub const ASSOCIATION_LN_CLASS_ID: u16 = 15;
/// Logical name of the current association object
pub const CURRENT_ASSOCIATION: [u8; 6] = [0, 0, 40, 0, 0, 255];
pub const REPLY_TO_HLS_METHOD: u8 = 1;

/// Confirmed, high priority, invoke id 1
pub const DEFAULT_INVOKE_ID_AND_PRIORITY: u8 = 0xC1;

const ACTION_REQUEST_TAG: u8 = 0xC3;
const ACTION_RESPONSE_TAG: u8 = 0xC7;
const NORMAL: u8 = 0x01;
const OCTET_STRING: u8 = 0x09;
const SUCCESS: u8 = 0x00;
const READ_WRITE_DENIED: u8 = 0x03;

/// `C3 01 <iid> 000F 0000280000FF 01 01 09 <len> <f(StoC)>`
pub fn encode_reply_to_hls_request(invoke_id_and_priority: u8, response: &[u8]) -> DlmsResult<Vec<u8>> {
    let length = octet_string_length(response)?;
    let mut pdu = Vec::with_capacity(16 + response.len());
    pdu.extend_from_slice(&[ACTION_REQUEST_TAG, NORMAL, invoke_id_and_priority]);
    pdu.extend_from_slice(&ASSOCIATION_LN_CLASS_ID.to_be_bytes());
    pdu.extend_from_slice(&CURRENT_ASSOCIATION);
    pdu.extend_from_slice(&[REPLY_TO_HLS_METHOD, 0x01, OCTET_STRING, length]);
    pdu.extend_from_slice(response);
    Ok(pdu)
}

/// Extract invoke id and f(StoC) from a `reply_to_hls` action request
///
/// `Ok(None)` for any other APDU.
pub fn decode_reply_to_hls_request(pdu: &[u8]) -> DlmsResult<Option<(u8, Vec<u8>)>> {
    let [ACTION_REQUEST_TAG, NORMAL, invoke_id, rest @ ..] = pdu else {
        return Ok(None);
    };
    if rest.len() < 9
        || rest[..2] != ASSOCIATION_LN_CLASS_ID.to_be_bytes()
        || rest[2..8] != CURRENT_ASSOCIATION
        || rest[8] != REPLY_TO_HLS_METHOD
    {
        return Ok(None);
    }
    match &rest[9..] {
        [0x01, OCTET_STRING, length, data @ ..] if data.len() == *length as usize => {
            Ok(Some((*invoke_id, data.to_vec())))
        }
        _ => Err(DlmsError::InvalidData(
            "Malformed reply_to_hls parameter".to_string(),
        )),
    }
}

/// Action response carrying f(CtoS), or a refusal when `response` is `None`
pub fn encode_reply_to_hls_response(invoke_id_and_priority: u8, response: Option<&[u8]>) -> DlmsResult<Vec<u8>> {
    let mut pdu = vec![ACTION_RESPONSE_TAG, NORMAL, invoke_id_and_priority];
    match response {
        Some(data) => {
            let length = octet_string_length(data)?;
            // result, return-parameters present, Get-Data-Result data
            pdu.extend_from_slice(&[SUCCESS, 0x01, 0x00, OCTET_STRING, length]);
            pdu.extend_from_slice(data);
        }
        None => pdu.extend_from_slice(&[READ_WRITE_DENIED, 0x00]),
    }
    Ok(pdu)
}

/// f(CtoS) from the server's action response
///
/// # Errors
/// `AuthenticationFailed` if the server refused pass 3.
pub fn decode_reply_to_hls_response(pdu: &[u8]) -> DlmsResult<Vec<u8>> {
    match pdu {
        [ACTION_RESPONSE_TAG, NORMAL, _, SUCCESS, 0x01, 0x00, OCTET_STRING, length, data @ ..]
            if data.len() == *length as usize =>
        {
            Ok(data.to_vec())
        }
        [ACTION_RESPONSE_TAG, NORMAL, _, result, ..] if *result != SUCCESS => Err(DlmsError::AuthenticationFailed(
            format!("Server refused reply_to_hls with action result {}", result),
        )),
        _ => Err(DlmsError::InvalidData(
            "Malformed reply_to_hls response".to_string(),
        )),
    }
}

fn octet_string_length(data: &[u8]) -> DlmsResult<u8> {
    u8::try_from(data.len())
        .ok()
        .filter(|len| *len < 0x80)
        .ok_or_else(|| DlmsError::InvalidData(format!("HLS response too long: {} bytes", data.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_form() {
        let pdu = encode_reply_to_hls_request(0xC1, &[0xAA; 4]).unwrap();
        assert_eq!(
            pdu,
            vec![
                0xC3, 0x01, 0xC1, 0x00, 0x0F, 0x00, 0x00, 0x28, 0x00, 0x00, 0xFF, 0x01, 0x01, 0x09, 0x04, 0xAA,
                0xAA, 0xAA, 0xAA
            ]
        );
        assert_eq!(decode_reply_to_hls_request(&pdu).unwrap(), Some((0xC1, vec![0xAA; 4])));
    }

    #[test]
    fn test_other_requests_are_not_hls() {
        // get-request for the clock
        let get = [0xC0, 0x01, 0xC1, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFF, 0x02, 0x00];
        assert_eq!(decode_reply_to_hls_request(&get).unwrap(), None);
        let mut other_method = encode_reply_to_hls_request(0xC1, &[1; 8]).unwrap();
        other_method[11] = 0x02;
        assert_eq!(decode_reply_to_hls_request(&other_method).unwrap(), None);
        let mut truncated = encode_reply_to_hls_request(0xC1, &[1; 8]).unwrap();
        truncated.pop();
        assert!(decode_reply_to_hls_request(&truncated).is_err());
    }

    #[test]
    fn test_response() {
        let pdu = encode_reply_to_hls_response(0xC1, Some(&[0x55; 16])).unwrap();
        assert_eq!(&pdu[..8], &[0xC7, 0x01, 0xC1, 0x00, 0x01, 0x00, 0x09, 0x10]);
        assert_eq!(decode_reply_to_hls_response(&pdu).unwrap(), vec![0x55; 16]);

        let refused = encode_reply_to_hls_response(0xC1, None).unwrap();
        assert_eq!(refused, vec![0xC7, 0x01, 0xC1, 0x03, 0x00]);
        assert!(matches!(
            decode_reply_to_hls_response(&refused),
            Err(DlmsError::AuthenticationFailed(_))
        ));
    }
}
