//! Builders of the outgoing control messages.
//!
//! The shapes here are wire-compatible with the original protocol, down to
//! header spelling and separator placement.

use rtsp_types::{
    ActionType, ParamInfo, ProjectionMode, RemoteControlParamInfo, RtspMessage, VtpType,
    COMMON_SEPARATOR as SEP, INVALID_VALUE, MSG_SEPARATOR as CRLF, STATUS_OK_STR,
};

const CONTENT_TYPE_TEXT: &str = "Content-Type: text/parameters";
const CONTENT_LENGTH: &str = "Content-Length: ";
const RTSP_VERSION: &str = " RTSP/1.0";
const RTSP_VERSION_HDR: &str = "RTSP/1.0 ";

fn now_date() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn version_str(version: f64) -> String {
    // keeps the six fractional digits the peers produce
    format!("{version:.6}")
}

fn request_headers(cur_seq: i32) -> String {
    format!("Date: {}{CRLF}Cseq: {cur_seq}{CRLF}", now_date())
}

fn response_headers(status: &str, cur_seq: i32) -> String {
    format!(
        "{RTSP_VERSION_HDR}{status}{CRLF}Date: {}{CRLF}Server: localhost{CRLF}Cseq: {cur_seq}{CRLF}",
        now_date()
    )
}

/// `ANNOUNCE` carrying the encryption algorithm list.
pub fn announce(alg_str: &str, cur_seq: i32, version: i32) -> String {
    let body = format!("encrypt_description: encrypt_list={alg_str}{SEP}version={version}{CRLF}");

    format!(
        "ANNOUNCE * RTSP/1.0{CRLF}{}{CRLF}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}",
        request_headers(cur_seq),
        body.len()
    )
}

/// `OPTIONS` request (M1/M2).
pub fn request_option(cur_seq: i32) -> String {
    format!(
        "OPTIONS * RTSP/1.0{CRLF}{}{CRLF}Require: com.huawei.hisight1.0{CRLF}{CRLF}",
        request_headers(cur_seq)
    )
}

/// `OPTIONS` response advertising the supported methods.
pub fn response_option(version: f64, cur_seq: i32) -> String {
    format!(
        "RTSP/1.0 200 OK{CRLF}{}{CRLF}Public: com.huawei.hisight{} ,SETUP, TEARDOWN, PLAY, PAUSE, GET_PARAMETER, SET_PARAMETER{CRLF}{CRLF}",
        response_headers(STATUS_OK_STR, cur_seq),
        version_str(version)
    )
}

/// `GET_PARAMETER` (M3) listing the parameter names we want from the peer.
pub fn request_get_parameter(param: &ParamInfo, cur_seq: i32) -> String {
    let mut body = String::new();
    body.push_str("his_version");
    body.push_str(CRLF);
    body.push_str("his_video_formats");
    body.push_str(CRLF);
    body.push_str("his_audio_codecs");
    body.push_str(CRLF);
    body.push_str("his_audio_formats");
    body.push_str(CRLF);
    if param.remote_control.support_uibc {
        body.push_str("his_uibc_capability");
        body.push_str(CRLF);
    }
    if !param.feature_set.is_empty() {
        body.push_str("his_feature");
        body.push_str(CRLF);
    }
    if param.vtp != VtpType::NotSupportVideo {
        body.push_str("his_vtp");
        body.push_str(CRLF);
    }
    body.push_str("his_device_type");
    body.push_str(CRLF);
    body.push_str("his_player_controller_capability");
    body.push_str(CRLF);
    body.push_str("his_media_capability");
    body.push_str(CRLF);

    format!(
        "GET_PARAMETER rtsp://localhost/hisight{}{RTSP_VERSION}{CRLF}{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}",
        version_str(param.version),
        request_headers(cur_seq),
        body.len()
    )
}

fn encap_feature(body: &mut String, param: &ParamInfo) {
    body.push_str("his_feature: input_feature_set=");
    let mut first = true;
    for feature in &param.feature_set {
        if !first {
            body.push_str(", ");
        }
        body.push_str(&feature.to_string());
        first = false;
    }
    body.push_str(SEP);
    body.push_str(CRLF);
}

fn input_category_list(rc: &RemoteControlParamInfo) -> &'static str {
    match (rc.support_generic, rc.support_hidc) {
        (true, true) => "GENERIC/HIDC",
        (true, false) => "GENERIC",
        (false, true) => "HIDC",
        (false, false) => {
            log::error!("neither generic nor hidc supported");
            ""
        }
    }
}

fn encap_cap_list(body: &mut String, key: &str, list: &[String]) {
    body.push_str(key);
    for (index, item) in list.iter().enumerate() {
        body.push_str(item);
        if index + 1 != list.len() {
            body.push_str(", ");
        }
    }
    body.push_str(SEP);
}

fn encap_uibc(body: &mut String, param: &ParamInfo) {
    let rc = &param.remote_control;
    if !rc.support_generic && !rc.support_hidc {
        log::error!("uibc advertised without a supported category");
        return;
    }
    body.push_str("his_uibc_capability: input_category_list=");
    body.push_str(input_category_list(rc));
    body.push_str(SEP);

    if rc.support_generic {
        encap_cap_list(body, "generic_cap_list=", &rc.generic_list);
    }
    if rc.support_hidc {
        encap_cap_list(body, "hidc_cap_list=", &rc.hidc_list);
    }
    if rc.support_vendor {
        encap_cap_list(body, "vendor_cap_list=", &rc.vendor_list);
    }
    body.push_str(CRLF);
}

/// `his_video_formats` (and `his_audio_codecs` when set).
pub fn video_codecs_parameter(param: &ParamInfo) -> String {
    let v = &param.video;
    let mut body = format!(
        "his_video_formats: codecs {}{SEP}fps {}{SEP}gop {}{SEP}bitrate {}{SEP}vbr-min {}{SEP}vbr-max {}{SEP}dpi {}{SEP}scr-w {}{SEP}scr-h {}{SEP}color-standard {}{SEP}width {}{SEP}height {}{CRLF}",
        v.codec_type,
        v.fps,
        v.gop,
        v.bitrate,
        v.min_bitrate,
        v.max_bitrate,
        v.dpi,
        param.window.width,
        param.window.height,
        v.color_standard,
        v.video_width,
        v.video_height,
    );
    if param.audio.codec > 0 {
        body.push_str(&format!("his_audio_codecs: {}{CRLF}", param.audio.codec));
    }
    body
}

/// `his_audio_formats`.
pub fn audio_parameter(param: &ParamInfo) -> String {
    let a = &param.audio;
    format!(
        "his_audio_formats: sample-rate {}{SEP}sample-bit-width {}{SEP}channel-config {}{SEP}bitrate {}{CRLF}",
        a.sample_rate, a.sample_bit_width, a.channel_config, a.bitrate
    )
}

fn player_controller_capability(param: &ParamInfo) -> String {
    if param.player_controller_capability.is_empty() {
        return String::new();
    }
    format!(
        "his_player_controller_capability: {}{SEP}{CRLF}",
        param.player_controller_capability
    )
}

fn media_capability(param: &ParamInfo) -> String {
    if param.media_capability.is_empty() {
        return String::new();
    }
    format!("his_media_capability: {}{SEP}{CRLF}", param.media_capability)
}

/// Body of the M3 response: only the parameters the peer asked for.
fn response_get_param_m3_body(param: &ParamInfo, wanted: &str, body: &mut String) {
    if wanted.contains("his_version") {
        body.push_str(&format!("his_version: {}{CRLF}", version_str(param.version)));
    }
    if wanted.contains("his_video_formats") {
        body.push_str(&video_codecs_parameter(param));
    }
    if wanted.contains("his_audio_formats") {
        body.push_str(&audio_parameter(param));
    }
    if wanted.contains("his_uibc_capability") {
        encap_uibc(body, param);
    }
    if wanted.contains("his_vtp") && param.vtp != VtpType::NotSupportVideo {
        body.push_str("his_vtp: ");
        body.push_str(if param.vtp == VtpType::SupportVideo {
            "supported"
        } else {
            "supportAV"
        });
        body.push_str(CRLF);
    }
    if wanted.contains("his_feature") {
        encap_feature(body, param);
    }
    if wanted.contains("his_device_type") {
        body.push_str(&format!(
            "his_device_type: device_type {}{SEP}subtype {}{SEP}{CRLF}",
            param.device_type.local_device_type as i32, param.device_type.local_device_subtype as i32
        ));
    }
    if wanted.contains("his_player_controller_capability") {
        body.push_str(&player_controller_capability(param));
    }
    if wanted.contains("his_media_capability") {
        body.push_str(&media_capability(param));
    }
}

/// Response to the peer's `GET_PARAMETER` (M3).
pub fn response_get_param_m3(param: &ParamInfo, request: &RtspMessage, seq: i32) -> String {
    let mut body = String::new();
    response_get_param_m3_body(param, request.unmatched(), &mut body);

    format!(
        "{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}{CRLF}",
        response_headers(STATUS_OK_STR, seq),
        body.len()
    )
}

fn another_parameter(param: &ParamInfo, version: f64, ip: &str, body: &mut String) {
    if !param.feature_set.is_empty() {
        encap_feature(body, param);
    }
    body.push_str(&format!(
        "his_presentation_URL: rtsp://{ip}/hisight{}/streamid=0 none{CRLF}",
        version_str(version)
    ));
    body.push_str(&format!("his_version: {}{CRLF}", version_str(version)));

    if param.remote_control.support_uibc {
        encap_uibc(body, param);
    }

    let dt = &param.device_type;
    body.push_str(&format!(
        "his_device_type: source_device_type {}{SEP}source_subtype {}{SEP}device_type {}{SEP}subtype {}{SEP}{CRLF}",
        dt.local_device_type as i32,
        dt.local_device_subtype as i32,
        dt.remote_device_type as i32,
        dt.remote_device_subtype as i32,
    ));

    if param.vtp != VtpType::NotSupportVideo {
        body.push_str("his_vtp: ");
        body.push_str(if param.vtp == VtpType::SupportVideo {
            "supported"
        } else {
            "supportAV"
        });
        body.push_str(CRLF);
    }
    body.push_str(&format!(
        "his_extended_field: projection_mode{}{SEP}{CRLF}",
        if param.projection_mode == ProjectionMode::Stream {
            "MEDIA_RESOURCE"
        } else {
            "MIRROR"
        }
    ));
    body.push_str(&format!(
        "his_media_capability: {}{CRLF}his_player_controller_capability: {}{CRLF}",
        param.media_capability, param.player_controller_capability
    ));
}

/// `SET_PARAMETER` (M4) carrying the negotiated parameter set.
pub fn set_parameter_m4_request(param: &ParamInfo, version: f64, ip: &str, seq: i32) -> String {
    let mut body = video_codecs_parameter(param);
    body.push_str(&audio_parameter(param));
    another_parameter(param, version, ip, &mut body);

    format!(
        "SET_PARAMETER rtsp://localhost/hisight{}{RTSP_VERSION}{CRLF}{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}{CRLF}",
        version_str(version),
        request_headers(seq),
        body.len()
    )
}

/// `SET_PARAMETER` trigger request (`his_trigger_method: <action>`).
pub fn action_request(action: ActionType, version: f64, cur_seq: i32) -> String {
    let body = format!("his_trigger_method: {action}{CRLF}");

    format!(
        "SET_PARAMETER rtsp://localhost/hisight{}{RTSP_VERSION}{CRLF}{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}{CRLF}",
        version_str(version),
        request_headers(cur_seq),
        body.len()
    )
}

/// Empty `GET_PARAMETER` used as keep-alive.
pub fn keep_alive_request(cur_seq: i32, version: f64) -> String {
    format!(
        "GET_PARAMETER rtsp://localhost/hisight{}{RTSP_VERSION}{CRLF}{}",
        version_str(version),
        request_headers(cur_seq)
    )
}

/// Plain response mirroring the request's sequence number.
pub fn common_response(request: &RtspMessage, status: &str) -> String {
    let seq = match request.header("cseq") {
        Some(value) => rtsp_types::parse::parse_int(value).unwrap_or(INVALID_VALUE),
        None => INVALID_VALUE,
    };
    format!("{}{CRLF}", response_headers(status, seq))
}

/// Error response for unsupported methods.
pub fn error_response(request: &RtspMessage, error_detail: &str) -> String {
    format!(
        "RTSP/1.0 {error_detail}\nCSeq: {}\n",
        request.cseq()
    )
}

pub fn setup_request(cseq: i32, uri: &str, port: i32) -> String {
    let uri = if uri.is_empty() { "*" } else { uri };
    format!(
        "SETUP {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}Transport: RTP/AVP/UDP;unicast;client_port={port}{CRLF}{CRLF}"
    )
}

/// Setup response returning the chosen media/remote-control/rtcp ports.
pub fn setup_response(
    cseq: i32,
    server_port: i32,
    remotectl_port: i32,
    rtcp_port: i32,
) -> String {
    if cseq <= 0 {
        return String::new();
    }

    let transport = format!(
        "Transport: RTP/AVP/TCP{SEP}unicast{SEP}rtcp_port={rtcp_port}{SEP}server_port={server_port}{SEP}remotectl_port={remotectl_port}{CRLF}"
    );

    format!(
        "{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{transport}",
        response_headers(STATUS_OK_STR, cseq),
        transport.len()
    )
}

pub fn play_request(cseq: i32, uri: &str, port: i32) -> String {
    let uri = if uri.is_empty() { "*" } else { uri };
    format!(
        "PLAY {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}Transport: RTP/AVP/UDP;unicast;client_port={port}{CRLF}{CRLF}"
    )
}

pub fn teardown_request(cseq: i32, uri: &str) -> String {
    format!("TEARDOWN {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}{CRLF}")
}

pub fn pause_request(cseq: i32, uri: &str) -> String {
    format!("PAUSE {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}{CRLF}")
}

/// `SET_PARAMETER` forwarding a module event change.
pub fn event_change_request(
    module_id: i32,
    event: i32,
    param: &str,
    version: f64,
    cur_seq: i32,
) -> String {
    let body = format!(
        "his_trigger_method: SEND_EVENT_CHANGE{CRLF}module_id: {module_id}{CRLF}event: {event}{CRLF}param: {param}{CRLF}"
    );

    format!(
        "SET_PARAMETER rtsp://localhost/hisight{}{RTSP_VERSION}{CRLF}{}{CONTENT_TYPE_TEXT}{CRLF}{CONTENT_LENGTH}{}{CRLF}{CRLF}{body}{CRLF}",
        version_str(version),
        request_headers(cur_seq),
        body.len()
    )
}

/// `SET_PARAMETER` carrying a bare numeric trigger.
pub fn set_param_trigger_request(cseq: i32, uri: &str, trigger: i32) -> String {
    format!(
        "SET_PARAMETER {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}Trigger: {trigger}{CRLF}{CRLF}"
    )
}

pub fn render_ready_request(cseq: i32, uri: &str, ready_flag: i32) -> String {
    format!(
        "RENDER_READY {uri}{RTSP_VERSION}{CRLF}CSeq: {cseq}{CRLF}readyflag: {ready_flag}{CRLF}{CRLF}"
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use rtsp_types::Method;

    #[test]
    fn options_round_trips_through_parser() {
        let wire = request_option(1);
        assert!(wire.starts_with("OPTIONS * RTSP/1.0\r\n"));
        assert!(wire.ends_with("Require: com.huawei.hisight1.0\r\n\r\n"));

        let msg = RtspMessage::parse(&wire);
        assert_eq!(msg.method(), Some(Method::OPTIONS));
        assert_eq!(msg.cseq(), 1);
    }

    #[test]
    fn options_response_advertises_methods() {
        let wire = response_option(1.0, 1);
        let msg = RtspMessage::parse(&wire);

        assert_eq!(msg.status_code(), 200);
        assert_eq!(msg.cseq(), 1);
        let public = msg.header("public").unwrap();
        for method in ["SETUP", "TEARDOWN", "PLAY", "PAUSE", "GET_PARAMETER", "SET_PARAMETER"] {
            assert!(public.contains(method));
        }
    }

    #[test]
    fn announce_carries_algorithm_and_version() {
        let wire = announce("aes128ctr", 2, 1);
        let msg = RtspMessage::parse(&wire);

        assert_eq!(msg.method(), Some(Method::ANNOUNCE));
        let desc = msg.header("encrypt_description").unwrap();
        assert_eq!(
            rtsp_types::parse::get_target_str(desc, "encrypt_list=", ";"),
            "aes128ctr"
        );
        assert_eq!(rtsp_types::parse::get_target_str(desc, "version=", ";"), "1");
    }

    #[test]
    fn trigger_request_names_the_action() {
        let wire = action_request(ActionType::Setup, 1.0, 9);
        let msg = RtspMessage::parse(&wire);

        assert_eq!(msg.method(), Some(Method::SET_PARAMETER));
        assert_eq!(msg.header("his_trigger_method"), Some("SETUP"));
    }

    #[test]
    fn setup_response_lists_all_ports() {
        let wire = setup_response(5, 4000, 4001, 4002);
        let msg = RtspMessage::parse(&wire);

        let transport = msg.header("transport").unwrap();
        assert_eq!(
            rtsp_types::parse::get_target_str(transport, "server_port=", ";"),
            "4000"
        );
        assert_eq!(
            rtsp_types::parse::get_target_str(transport, "remotectl_port=", ";"),
            "4001"
        );
        assert_eq!(
            rtsp_types::parse::get_target_str(transport, "rtcp_port=", ";"),
            "4002"
        );

        assert!(setup_response(0, 1, 2, 3).is_empty());
    }

    #[test]
    fn event_change_round_trips() {
        let wire = event_change_request(3, 17, "detail", 1.0, 11);
        let msg = RtspMessage::parse(&wire);

        assert_eq!(msg.header("his_trigger_method"), Some("SEND_EVENT_CHANGE"));
        assert_eq!(msg.header("module_id"), Some("3"));
        assert_eq!(msg.header("event"), Some("17"));
        assert_eq!(msg.header("param"), Some("detail"));
    }
}
