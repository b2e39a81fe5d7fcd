//! End-to-end scenarios: rewrite round trips, encryption inverses, hybrid
//! files and repair of damaged inputs.

use pdfmill::object::{keys, ObjectId};
use pdfmill::{CommandMode, Configuration, Context, Error, ValidationMode};

const CONTENT: &[u8] = b"BT /F1 24 Tf 72 720 Td (Hello) Tj ET";

/// A classical single-page file with a Flate content stream and an info
/// dictionary.
fn simple_pdf() -> Vec<u8> {
    simple_pdf_with_page_entries("")
}

fn simple_pdf_with_page_entries(page_extra: &str) -> Vec<u8> {
    let encoded = {
        let mut dict = pdfmill::object::Dict::new();
        dict.set(keys::FILTER, pdfmill::object::Object::name(b"FlateDecode"));
        let chain = pdfmill::filter::FilterChain::from_stream_dict(&dict).unwrap();
        chain.encode(CONTENT).unwrap()
    };

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = vec![];

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "3 0 obj\n<< /Type /Page /Parent 2 0 R {page_extra}/MediaBox [0 0 612 792] /Contents 4 0 R >>\nendobj\n"
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj\n<< /Filter /FlateDecode /Length {} >>\nstream\n",
            encoded.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&encoded);
    out.extend_from_slice(b"\nendstream\nendobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj\n<< /Producer (roundtrip fixture) >>\nendobj\n");

    let xref = out.len();
    out.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R /Info 5 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{xref}\n%%EOF\n").as_bytes());

    out
}

fn read(data: Vec<u8>, config: Configuration) -> Context {
    Context::read(data, config).unwrap()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Resolve the single page's decoded content bytes.
fn content_bytes(ctx: &mut Context) -> Vec<u8> {
    let root = ctx.root_id().unwrap();
    let catalog = ctx.dereference(root).unwrap().as_dict().unwrap().clone();
    let pages_ref = catalog.get_ref(keys::PAGES).unwrap();
    let pages = ctx
        .dereference(pages_ref)
        .unwrap()
        .as_dict()
        .unwrap()
        .clone();
    let kid = pages.get_array(keys::KIDS).unwrap()[0]
        .as_reference()
        .unwrap();
    let page = ctx.dereference(kid).unwrap().as_dict().unwrap().clone();
    let contents = page.get_ref(b"Contents").unwrap();

    ctx.decoded_stream(contents).unwrap()
}

fn page_count(ctx: &mut Context) -> i64 {
    let root = ctx.root_id().unwrap();
    let catalog = ctx.dereference(root).unwrap().as_dict().unwrap().clone();
    let pages_ref = catalog.get_ref(keys::PAGES).unwrap();

    ctx.dereference(pages_ref)
        .unwrap()
        .as_dict()
        .unwrap()
        .get_int(keys::COUNT)
        .unwrap()
}

#[test]
fn optimize_terminates_and_round_trips() {
    let mut config = Configuration::default();
    config.write_object_stream = false;
    config.write_xref_stream = false;

    let out = pdfmill::optimize(simple_pdf(), config).unwrap();

    let tail = String::from_utf8_lossy(&out[out.len().saturating_sub(16)..]);
    assert!(tail.contains("%%EOF"));

    let mut reread = read(out, Configuration::default());
    assert_eq!(page_count(&mut reread), 1);
    assert_eq!(content_bytes(&mut reread), CONTENT);

    // Optimization never grows the set of in-use objects.
    assert!(reread.xref.in_use_ids().len() <= 5);
}

#[test]
fn classical_rewrite_round_trips() {
    let mut config = Configuration::default();
    config.write_object_stream = false;
    config.write_xref_stream = false;

    let mut ctx = read(simple_pdf(), config.clone());
    let out = pdfmill::write_document(&mut ctx).unwrap();

    // A classical rewrite keeps the classical xref shape.
    assert!(contains(&out, b"xref\n"));
    assert!(!contains(&out, b"/Type /XRef"));

    let mut reread = read(out, config);
    assert_eq!(content_bytes(&mut reread), CONTENT);
}

#[test]
fn object_stream_rewrite_round_trips() {
    // The default configuration packs objects and terminates with an xref
    // stream.
    let mut ctx = read(simple_pdf(), Configuration::default());
    let out = pdfmill::write_document(&mut ctx).unwrap();

    assert!(contains(&out, b"/Type /ObjStm"));
    assert!(contains(&out, b"/Type /XRef"));

    let mut reread = read(out, Configuration::default());
    assert_eq!(page_count(&mut reread), 1);
    assert_eq!(content_bytes(&mut reread), CONTENT);
}

#[test]
fn object_streams_respect_reader15() {
    let mut ctx = read(simple_pdf(), Configuration::default());
    let out = pdfmill::write_document(&mut ctx).unwrap();

    let mut config = Configuration::default();
    config.reader15 = false;

    // A pure 1.5-style file is unreadable without Reader15 in strict mode.
    config.validation_mode = ValidationMode::Strict;
    assert!(matches!(
        Context::read(out, config),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn crlf_output_round_trips() {
    let mut config = Configuration::default();
    config.eol = pdfmill::Eol::CrLf;
    config.write_object_stream = false;
    config.write_xref_stream = false;

    let mut ctx = read(simple_pdf(), config);
    let out = pdfmill::write_document(&mut ctx).unwrap();
    assert!(contains(&out, b"%%EOF\r\n"));

    let mut reread = read(out, Configuration::default());
    assert_eq!(content_bytes(&mut reread), CONTENT);
}

#[test]
fn rc4_encrypt_decrypt_inverse() {
    let mut config = Configuration::new_rc4("user", "owner", 128);
    config.permissions = -44;

    let encrypted = pdfmill::encrypt(simple_pdf(), config).unwrap();
    assert!(contains(&encrypted, b"/Encrypt"));

    // The user password opens the file and the content matches.
    let mut config = Configuration::default();
    config.user_pw = "user".into();
    let mut ctx = read(encrypted.clone(), config.clone());
    assert_eq!(content_bytes(&mut ctx), CONTENT);

    // The user permission mask survives, sign-extended.
    assert_eq!(ctx.permissions(), -44i32 as u32);

    // A wrong password is rejected with an encryption error.
    let mut wrong = Configuration::default();
    wrong.user_pw = "wrong".into();
    assert!(matches!(
        Context::read(encrypted.clone(), wrong),
        Err(Error::Encryption(_))
    ));

    // The owner password opens it regardless of P.
    let mut owner = Configuration::default();
    owner.owner_pw = "owner".into();
    let mut ctx = read(encrypted.clone(), owner);
    assert_eq!(ctx.permissions(), 0xFFFF_FFFF);

    // Decrypting with the user password yields a twin of the original.
    let mut config = Configuration::default();
    config.user_pw = "user".into();
    let decrypted = pdfmill::decrypt(encrypted, config).unwrap();
    assert!(!contains(&decrypted, b"/Encrypt"));

    let mut ctx = read(decrypted, Configuration::default());
    assert_eq!(content_bytes(&mut ctx), CONTENT);
    assert_eq!(page_count(&mut ctx), 1);
}

#[test]
fn aes256_reads_like_its_plain_twin() {
    let config = Configuration::new_aes("pw", "opw", 256);
    let encrypted = pdfmill::encrypt(simple_pdf(), config).unwrap();

    let mut read_config = Configuration::default();
    read_config.user_pw = "pw".into();
    let mut ctx = read(encrypted, read_config);

    let mut plain = read(simple_pdf(), Configuration::default());
    assert_eq!(content_bytes(&mut ctx), content_bytes(&mut plain));
}

#[test]
fn aes256_rewrites_to_rc4() {
    let encrypted =
        pdfmill::encrypt(simple_pdf(), Configuration::new_aes("pw", "opw", 256)).unwrap();

    // Re-key the AES-256 file to RC4-128 in one pass.
    let mut config = Configuration::new_rc4("pw", "opw", 128);
    config.user_pw = "pw".into();
    let mut ctx = read(encrypted, config);
    let out = pdfmill::write_document(&mut ctx).unwrap();

    assert!(contains(&out, b"/V 2"));
    assert!(contains(&out, b"/R 3"));

    let mut read_config = Configuration::default();
    read_config.user_pw = "pw".into();
    let mut reread = read(out, read_config);
    assert_eq!(content_bytes(&mut reread), CONTENT);
}

#[test]
fn password_change_round_trips() {
    let encrypted =
        pdfmill::encrypt(simple_pdf(), Configuration::new_rc4("old", "owner", 128)).unwrap();

    let mut config = Configuration::new_rc4("old", "owner", 128);
    config.user_pw_new = Some("new".into());
    let rekeyed = pdfmill::change_user_password(encrypted, config).unwrap();

    let mut old = Configuration::default();
    old.user_pw = "old".into();
    assert!(Context::read(rekeyed.clone(), old).is_err());

    let mut new = Configuration::default();
    new.user_pw = "new".into();
    let mut ctx = read(rekeyed, new);
    assert_eq!(content_bytes(&mut ctx), CONTENT);
}

/// A classical file extended with an `/XRefStm` pointing at an xref stream
/// whose type-2 entries expose an extra object.
fn hybrid_pdf() -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.5\n".to_vec();
    let mut offsets = vec![];

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n",
    );

    // Object 4 lives inside object stream 5.
    let payload = b"4 0 (hidden treasure)";
    let objstm = out.len();
    out.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 1 /First 4 /Length {} >>\nstream\n",
            payload.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    // The xref stream records objects 4-6.
    let xref_stm = out.len();
    let mut records: Vec<u8> = vec![];
    records.extend_from_slice(&[2, 0, 5, 0]); // 4: in stream 5, index 0
    records.push(1);
    records.extend_from_slice(&(objstm as u16).to_be_bytes());
    records.push(0); // 5: at objstm
    records.push(1);
    records.extend_from_slice(&(xref_stm as u16).to_be_bytes());
    records.push(0); // 6: the xref stream itself

    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /Index [4 3] /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
            records.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&records);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let xref = out.len();
    out.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!("trailer\n<< /Size 7 /Root 1 0 R /XRefStm {xref_stm} >>\nstartxref\n").as_bytes(),
    );
    out.extend_from_slice(format!("{xref}\n%%EOF\n").as_bytes());

    out
}

#[test]
fn hybrid_file_reader15_toggles_compressed_objects() {
    // With Reader15 the compressed object resolves.
    let mut ctx = read(hybrid_pdf(), Configuration::default());
    let hidden = ctx.dereference(ObjectId::new(4, 0)).unwrap().clone();
    assert_eq!(
        hidden.as_string().map(|s| s.as_bytes().to_vec()),
        Some(b"hidden treasure".to_vec())
    );

    // Without it only the classical entries are visible.
    let mut config = Configuration::default();
    config.reader15 = false;
    let mut ctx = read(hybrid_pdf(), config);
    assert!(ctx.dereference(ObjectId::new(4, 0)).unwrap().is_null());
    assert_eq!(page_count(&mut ctx), 1);
}

#[test]
fn wrong_stream_length_strict_vs_relaxed() {
    let mut data = simple_pdf();

    // Grow /Length of the content stream by 5 bytes.
    let pos = data.windows(8).position(|w| w == b"/Length ").unwrap() + 8;
    let end = pos + data[pos..].iter().position(|b| !b.is_ascii_digit()).unwrap();
    let length: usize = String::from_utf8_lossy(&data[pos..end]).parse().unwrap();
    let grown = (length + 5).to_string();
    data.splice(pos..end, grown.into_bytes());

    let mut strict = Configuration::default();
    strict.validation_mode = ValidationMode::Strict;
    let mut ctx = read(data.clone(), strict);
    assert!(matches!(
        ctx.dereference(ObjectId::new(4, 0)),
        Err(Error::Syntax { .. }) | Err(Error::XRef(_))
    ));

    // Relaxed mode recovers the payload by scanning for endstream.
    let mut ctx = read(data, Configuration::default());
    assert_eq!(content_bytes(&mut ctx), CONTENT);
}

#[test]
fn corrupt_startxref_is_rebuilt_relaxed() {
    let mut data = simple_pdf();
    let pos = data.windows(9).rposition(|w| w == b"startxref").unwrap();
    data[pos + 10] = b'7';
    data[pos + 11] = b'7';
    data[pos + 12] = b'7';

    let mut strict = Configuration::default();
    strict.validation_mode = ValidationMode::Strict;
    assert!(Context::read(data.clone(), strict).is_err());

    let mut ctx = read(data, Configuration::default());
    assert!(ctx.xref.repaired());
    assert_eq!(page_count(&mut ctx), 1);
    assert_eq!(content_bytes(&mut ctx), CONTENT);
}

#[test]
fn reduced_feature_set_drops_annotations() {
    // Seed the page with an annotation array.
    let data = simple_pdf_with_page_entries("/Annots [] ");

    let mut config = Configuration::default();
    config.cmd = CommandMode::Split;
    let mut ctx = read(data, config);
    let out = pdfmill::write_document(&mut ctx).unwrap();

    let mut reread = read(out, Configuration::default());
    let root = reread.root_id().unwrap();
    let catalog = reread.dereference(root).unwrap().as_dict().unwrap().clone();
    let pages_ref = catalog.get_ref(keys::PAGES).unwrap();
    let pages = reread
        .dereference(pages_ref)
        .unwrap()
        .as_dict()
        .unwrap()
        .clone();
    let kid = pages.get_array(keys::KIDS).unwrap()[0]
        .as_reference()
        .unwrap();
    let page = reread.dereference(kid).unwrap().as_dict().unwrap().clone();

    assert!(!page.contains_key(b"Annots"));
}

#[test]
fn unreferenced_objects_are_dropped() {
    let mut data = simple_pdf();

    // Splice in an orphan object as an incremental update.
    let orphan = data.len();
    data.extend_from_slice(b"9 0 obj\n<< /Orphan true >>\nendobj\n");
    let first_xref = {
        let pos = data.windows(9).rposition(|w| w == b"startxref").unwrap();
        let tail = String::from_utf8_lossy(&data[pos + 9..]);
        tail.split_whitespace().next().unwrap().parse::<usize>().unwrap()
    };
    let xref = data.len();
    data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n9 1\n");
    data.extend_from_slice(format!("{orphan:010} 00000 n \n").as_bytes());
    data.extend_from_slice(
        format!(
            "trailer\n<< /Size 10 /Root 1 0 R /Prev {first_xref} >>\nstartxref\n{xref}\n%%EOF\n"
        )
        .as_bytes(),
    );

    let mut ctx = read(data, Configuration::default());
    assert!(!ctx
        .dereference(ObjectId::new(9, 0))
        .unwrap()
        .is_null());

    let out = pdfmill::write_document(&mut ctx).unwrap();
    let mut reread = read(out, Configuration::default());

    // The orphan did not survive the renumbering rewrite.
    let orphan_alive = reread.xref.in_use_ids().iter().any(|id| {
        reread
            .dereference(*id)
            .ok()
            .and_then(|o| o.as_dict().map(|d| d.contains_key(b"Orphan")))
            .unwrap_or(false)
    });
    assert!(!orphan_alive);
}
