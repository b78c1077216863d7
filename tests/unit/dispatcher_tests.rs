use cinder::models::module::ModuleMetadata;
use cinder::models::task::{TaskCommand, TaskKind};
use cinder::tasking::dispatcher::{
    frame_save_payload, parse_save_header, select_command, TaskTarget, SAVE_EXT_WIDTH,
    SAVE_NAME_WIDTH,
};

fn meta(background: bool, run_on_disk: bool, extension: &str) -> ModuleMetadata {
    ModuleMetadata {
        name: "collection/screenshot".into(),
        background,
        run_on_disk,
        output_extension: if extension.is_empty() {
            None
        } else {
            Some(extension.into())
        },
        needs_admin: false,
    }
}

#[test]
fn background_module_selects_job() {
    let command = select_command(&meta(true, false, ""));
    assert_eq!(command, TaskCommand { kind: TaskKind::Job, save: false });
}

#[test]
fn background_takes_precedence_over_run_on_disk() {
    let command = select_command(&meta(true, true, ""));
    assert_eq!(command.kind, TaskKind::Job);
}

#[test]
fn run_on_disk_module_selects_disk_kind() {
    let command = select_command(&meta(false, true, ""));
    assert_eq!(command, TaskCommand { kind: TaskKind::RunFromDisk, save: false });
}

#[test]
fn foreground_module_selects_inline_kind() {
    let command = select_command(&meta(false, false, ""));
    assert_eq!(command, TaskCommand { kind: TaskKind::RunInline, save: false });
}

#[test]
fn output_extension_adds_save_variant() {
    for (background, run_on_disk, kind) in [
        (true, false, TaskKind::Job),
        (false, true, TaskKind::RunFromDisk),
        (false, false, TaskKind::RunInline),
    ] {
        let command = select_command(&meta(background, run_on_disk, "png"));
        assert_eq!(command, TaskCommand { kind, save: true });
    }
}

#[test]
fn empty_extension_is_not_save() {
    let module = ModuleMetadata {
        output_extension: Some(String::new()),
        ..meta(false, false, "")
    };
    assert!(!select_command(&module).save);
}

#[test]
fn wire_strings_round_trip() {
    for kind in [TaskKind::Job, TaskKind::RunFromDisk, TaskKind::RunInline] {
        for save in [false, true] {
            let command = TaskCommand { kind, save };
            assert_eq!(TaskCommand::from_wire(command.wire()).unwrap(), command);
        }
    }
}

#[test]
fn unknown_wire_string_is_rejected() {
    assert!(TaskCommand::from_wire("TASK_CMD_BOGUS").is_err());
}

#[test]
fn save_header_has_fixed_widths() {
    let framed = frame_save_payload("screenshot", "png", b"DATA");
    assert_eq!(framed.len(), SAVE_NAME_WIDTH + SAVE_EXT_WIDTH + 4);
    assert_eq!(&framed[..SAVE_NAME_WIDTH], b"     screenshot");
    assert_eq!(&framed[SAVE_NAME_WIDTH..SAVE_NAME_WIDTH + SAVE_EXT_WIDTH], b"  png");
}

#[test]
fn save_header_round_trips() {
    for (name, ext) in [
        ("screenshot", "png"),
        ("a", "b"),
        ("exactly15chars_", "5char"),
        ("keychain", "txt"),
    ] {
        let framed = frame_save_payload(name, ext, b"payload bytes");
        let (header, payload) = parse_save_header(&framed).unwrap();
        assert_eq!(header.name, name);
        assert_eq!(header.extension, ext);
        assert_eq!(payload, b"payload bytes");
    }
}

#[test]
fn overlong_name_and_extension_are_truncated() {
    let framed = frame_save_payload("averyverylongmodulename", "tarball", b"");
    let (header, _) = parse_save_header(&framed).unwrap();
    assert_eq!(header.name, "averyverylongmo");
    assert_eq!(header.name.len(), 15);
    assert_eq!(header.extension, "tarba");
}

#[test]
fn short_payload_fails_header_parse() {
    assert!(parse_save_header(b"too short").is_err());
}

#[test]
fn multibyte_name_characters_stay_within_field_width() {
    // 14 ASCII chars plus one two-byte char: the framed name field must
    // still be exactly 15 bytes, with the non-ASCII char mapped away.
    let framed = frame_save_payload("aaaaaaaaaaaaaa\u{e9}", "png", b"DATA");
    assert_eq!(framed.len(), SAVE_NAME_WIDTH + SAVE_EXT_WIDTH + 4);

    let (header, payload) = parse_save_header(&framed).unwrap();
    assert_eq!(header.name, "aaaaaaaaaaaaaa_");
    assert_eq!(header.extension, "png");
    assert_eq!(payload, b"DATA");
}

#[test]
fn multibyte_extension_is_sanitized() {
    let framed = frame_save_payload("keychain", "\u{e9}\u{e9}", b"");
    let (header, _) = parse_save_header(&framed).unwrap();
    assert_eq!(header.extension, "__");
}

#[test]
fn field_boundary_inside_a_multibyte_sequence_is_an_error() {
    // A foreign producer can pad with raw UTF-8 so that byte 15 lands in
    // the middle of a character; that must parse as an error, not panic.
    let mut framed = Vec::new();
    framed.extend_from_slice(b"aaaaaaaaaaaaaa"); // 14 bytes
    framed.extend_from_slice("\u{e9}".as_bytes()); // bytes 14..16
    framed.extend_from_slice(b"  png");
    framed.extend_from_slice(b"DATA");
    assert!(parse_save_header(&framed).is_err());
}

#[test]
fn target_parse_recognizes_reserved_words() {
    assert_eq!(TaskTarget::parse("all"), TaskTarget::All);
    assert_eq!(TaskTarget::parse("ALL"), TaskTarget::All);
    assert_eq!(TaskTarget::parse("autorun"), TaskTarget::Autorun);
    assert_eq!(TaskTarget::parse("web01"), TaskTarget::Session("web01".into()));
}
