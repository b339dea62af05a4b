use bfs_archive::{IsoFs, IsoFsConfig, VolumeKind};
use bfs_core::{ErrorCode, FileFlag, FileSystem, FileType};
use pretty_assertions::assert_eq;

const SECTOR: usize = 2048;
const DIR: u8 = 0x2;

/// 2000-01-01T00:00:00Z in milliseconds.
const Y2K_MS: f64 = 946_684_800_000.0;

fn both16(v: u16) -> Vec<u8> {
    let mut out = v.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_be_bytes());
    out
}

fn both32(v: u32) -> Vec<u8> {
    let mut out = v.to_le_bytes().to_vec();
    out.extend_from_slice(&v.to_be_bytes());
    out
}

fn utf16be(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

/// A directory record with an optional system use area.
fn record(lba: u32, len: u32, flags: u8, id: &[u8], su: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8, 0];
    out.extend(both32(lba));
    out.extend(both32(len));
    out.extend_from_slice(&[100, 1, 1, 0, 0, 0, 0]);
    out.push(flags);
    out.extend_from_slice(&[0, 0]);
    out.extend(both16(1));
    out.push(id.len() as u8);
    out.extend_from_slice(id);
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out.extend_from_slice(su);
    out[0] = out.len() as u8;
    out
}

fn su_entry(sig: &[u8; 2], body: &[u8]) -> Vec<u8> {
    let mut out = sig.to_vec();
    out.push((4 + body.len()) as u8);
    out.push(1);
    out.extend_from_slice(body);
    out
}

fn sp() -> Vec<u8> {
    su_entry(b"SP", &[0xBE, 0xEF, 0])
}

fn er() -> Vec<u8> {
    let mut body = vec![10, 0, 0, 1];
    body.extend_from_slice(b"IEEE_P1282");
    su_entry(b"ER", &body)
}

fn nm(name: &str) -> Vec<u8> {
    let mut body = vec![0];
    body.extend_from_slice(name.as_bytes());
    su_entry(b"NM", &body)
}

fn px(mode: u32, uid: u32, gid: u32) -> Vec<u8> {
    let mut body = both32(mode);
    body.extend(both32(1));
    body.extend(both32(uid));
    body.extend(both32(gid));
    su_entry(b"PX", &body)
}

fn sl(components: &[&str]) -> Vec<u8> {
    let mut body = vec![0];
    for c in components {
        body.push(0);
        body.push(c.len() as u8);
        body.extend_from_slice(c.as_bytes());
    }
    su_entry(b"SL", &body)
}

struct Image {
    data: Vec<u8>,
}

impl Image {
    fn new(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * SECTOR],
        }
    }

    fn put(&mut self, sector: usize, bytes: &[u8]) {
        let start = sector * SECTOR;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn descriptor(&mut self, sector: usize, kind: u8, root_lba: u32, escape: Option<&[u8; 3]>) {
        let mut vd = vec![0u8; SECTOR];
        vd[0] = kind;
        vd[1..6].copy_from_slice(b"CD001");
        vd[6] = 1;
        let volume_id = match escape {
            Some(_) => utf16be("DISC"),
            None => b"DISC".to_vec(),
        };
        vd[40..40 + volume_id.len()].copy_from_slice(&volume_id);
        vd[80..88].copy_from_slice(&both32((self.data.len() / SECTOR) as u32));
        if let Some(escape) = escape {
            vd[88..91].copy_from_slice(escape);
        }
        vd[128..132].copy_from_slice(&both16(SECTOR as u16));
        let root = record(root_lba, SECTOR as u32, DIR, &[0], &[]);
        vd[156..156 + root.len()].copy_from_slice(&root);
        self.put(sector, &vd);
    }

    fn terminator(&mut self, sector: usize) {
        let mut vd = vec![255u8];
        vd.extend_from_slice(b"CD001");
        vd.push(1);
        self.put(sector, &vd);
    }

    fn directory(&mut self, sector: usize, records: &[Vec<u8>]) {
        self.put(sector, &records.concat());
    }

    fn build(self, name: &str) -> IsoFs {
        IsoFs::new(IsoFsConfig::new(self.data).with_name(name)).unwrap()
    }
}

fn plain_image() -> Image {
    let mut img = Image::new(24);
    img.descriptor(16, 1, 20, None);
    img.terminator(17);
    img.directory(
        20,
        &[
            record(20, 2048, DIR, &[0], &[]),
            record(20, 2048, DIR, &[1], &[]),
            record(22, 5, 0, b"HELLO.TXT;1", &[]),
            record(22, 5, 0, b"NOEXT.;1", &[]),
            record(21, 2048, DIR, b"DIR", &[]),
        ],
    );
    img.directory(
        21,
        &[
            record(21, 2048, DIR, &[0], &[]),
            record(20, 2048, DIR, &[1], &[]),
            record(23, 4, 0, b"DEEP.BIN;1", &[]),
        ],
    );
    img.put(22, b"hello");
    img.put(23, &[9, 8, 7, 6]);
    img
}

fn rock_ridge_image() -> Image {
    let mut img = Image::new(24);
    img.descriptor(16, 1, 20, None);
    img.terminator(17);
    img.directory(
        20,
        &[
            record(20, 2048, DIR, &[0], &[sp(), er()].concat()),
            record(20, 2048, DIR, &[1], &[]),
            record(
                22,
                9,
                0,
                b"README.TXT;1",
                &[nm("readme.md"), px(0o100644, 1000, 100)].concat(),
            ),
            record(21, 2048, DIR, b"SUBDIR", &nm("sub")),
            record(0, 0, 0, b"LINK.;1", &[nm("link"), sl(&["sub", "inner.txt"])].concat()),
        ],
    );
    img.directory(
        21,
        &[
            record(21, 2048, DIR, &[0], &[]),
            record(20, 2048, DIR, &[1], &[]),
            record(23, 5, 0, b"INNER.TXT;1", &nm("inner.txt")),
        ],
    );
    img.put(22, b"hello iso");
    img.put(23, b"inner");
    img
}

#[test]
fn plain_iso9660_names_drop_version_suffix() {
    let fs = plain_image().build("cd");
    assert_eq!(fs.name(), "IsoFS:cd-ISO9660");
    assert_eq!(fs.volume_kind(), VolumeKind::Iso9660);
    assert_eq!(fs.volume_identifier(), "DISC");
    assert!(!fs.has_rock_ridge());

    assert_eq!(fs.readdir("/").unwrap(), vec!["HELLO.TXT", "NOEXT", "DIR"]);
    assert_eq!(fs.readdir("/DIR").unwrap(), vec!["DEEP.BIN"]);
    assert_eq!(fs.read_file("/HELLO.TXT", FileFlag::Read).unwrap(), b"hello");
    assert_eq!(fs.read_file("/DIR/DEEP.BIN", FileFlag::Read).unwrap(), [9, 8, 7, 6]);

    let stats = fs.stat("/HELLO.TXT", false).unwrap();
    assert_eq!(stats.file_type(), FileType::File);
    assert_eq!(stats.size, 5);
    assert_eq!(stats.permissions(), 0o555);
    assert_eq!(stats.mtime_ms, Y2K_MS);
    assert!(fs.stat("/DIR", false).unwrap().is_directory());
}

#[test]
fn read_only_semantics() {
    let fs = plain_image().build("");
    assert_eq!(
        fs.open("/HELLO.TXT", FileFlag::Append, 0o644).unwrap_err().errno(),
        ErrorCode::Perm
    );
    assert_eq!(
        fs.open("/DIR", FileFlag::Read, 0o644).unwrap_err().errno(),
        ErrorCode::Isdir
    );
    assert_eq!(
        fs.readdir("/HELLO.TXT").unwrap_err().errno(),
        ErrorCode::Notdir
    );
    assert_eq!(fs.stat("/missing", false).unwrap_err().errno(), ErrorCode::Noent);
    assert_eq!(fs.mkdir("/new", 0o755).unwrap_err().errno(), ErrorCode::Notsup);
    assert!(fs.is_read_only());
    assert_eq!(fs.disk_space("/").free, 0);
}

#[test]
#[tracing_test::traced_test]
fn rock_ridge_name_takes_precedence() {
    let fs = rock_ridge_image().build("");
    assert_eq!(fs.name(), "IsoFS-ISO9660-RockRidge");
    assert!(logs_contain("opened iso image"));

    assert_eq!(fs.readdir("/").unwrap(), vec!["readme.md", "sub", "link"]);
    assert_eq!(fs.read_file("/readme.md", FileFlag::Read).unwrap(), b"hello iso");
    assert_eq!(
        fs.stat("/README.TXT", false).unwrap_err().errno(),
        ErrorCode::Noent
    );
    assert_eq!(fs.readdir("/sub").unwrap(), vec!["inner.txt"]);
}

#[test]
fn rock_ridge_modes_are_masked_read_only() {
    let fs = rock_ridge_image().build("");
    let stats = fs.stat("/readme.md", false).unwrap();
    assert_eq!(stats.permissions(), 0o444);
    assert_eq!(stats.file_type(), FileType::File);
    assert_eq!((stats.uid, stats.gid), (1000, 100));
}

#[test]
fn symlinks_resolve_from_the_link_directory() {
    let fs = rock_ridge_image().build("");
    assert_eq!(fs.readlink("/link").unwrap(), "sub/inner.txt");
    assert!(fs.stat("/link", true).unwrap().is_symbolic_link());

    let target = fs.stat("/link", false).unwrap();
    assert!(target.is_file());
    assert_eq!(target.size, 5);
    assert_eq!(fs.read_file("/link", FileFlag::Read).unwrap(), b"inner");
    assert_eq!(fs.realpath("/link").unwrap(), "/sub/inner.txt");
    assert_eq!(
        fs.readlink("/readme.md").unwrap_err().errno(),
        ErrorCode::Inval
    );
}

#[test]
fn symlink_cycles_are_bounded() {
    let mut img = Image::new(22);
    img.descriptor(16, 1, 20, None);
    img.terminator(17);
    img.directory(
        20,
        &[
            record(20, 2048, DIR, &[0], &[sp(), su_entry(b"RR", &[0x89])].concat()),
            record(20, 2048, DIR, &[1], &[]),
            record(0, 0, 0, b"A.;1", &[nm("a"), sl(&["b"])].concat()),
            record(0, 0, 0, b"B.;1", &[nm("b"), sl(&["a"])].concat()),
        ],
    );
    let fs = img.build("");
    assert!(fs.has_rock_ridge());
    assert_eq!(fs.stat("/a", false).unwrap_err().errno(), ErrorCode::Inval);
    assert!(fs.stat("/a", true).unwrap().is_symbolic_link());
}

#[test]
fn joliet_descriptor_is_preferred() {
    let mut img = Image::new(24);
    img.descriptor(16, 1, 20, None);
    img.descriptor(17, 2, 21, Some(b"%/E"));
    img.terminator(18);
    img.directory(
        20,
        &[
            record(20, 2048, DIR, &[0], &[]),
            record(20, 2048, DIR, &[1], &[]),
            record(22, 2, 0, b"GRUSSE.TXT;1", &[]),
        ],
    );
    img.directory(
        21,
        &[
            record(21, 2048, DIR, &[0], &[]),
            record(21, 2048, DIR, &[1], &[]),
            record(22, 2, 0, &utf16be("Grüße.txt;1"), &[]),
        ],
    );
    img.put(22, b"hi");
    let fs = img.build("");
    assert_eq!(fs.volume_kind(), VolumeKind::Joliet);
    assert_eq!(fs.name(), "IsoFS-Joliet");
    assert_eq!(fs.readdir("/").unwrap(), vec!["Grüße.txt"]);
    assert_eq!(fs.read_file("/Grüße.txt", FileFlag::Read).unwrap(), b"hi");
}

#[test]
fn unrecognized_escape_sequence_is_an_io_error() {
    let mut img = Image::new(24);
    img.descriptor(16, 1, 20, None);
    img.descriptor(17, 2, 21, Some(b"%/Z"));
    img.terminator(18);
    let err = IsoFs::new(IsoFsConfig::new(img.data)).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Io);
    assert!(err.message().contains("escape sequence"));
}

#[test]
fn images_without_descriptors_are_rejected() {
    let err = IsoFs::new(IsoFsConfig::new(vec![0u8; 20 * SECTOR])).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Io);
    assert!(err.message().contains("Unable to find a suitable volume descriptor."));

    let err = IsoFs::new(IsoFsConfig::new(vec![0u8; SECTOR])).unwrap_err();
    assert_eq!(err.errno(), ErrorCode::Inval);
}

fn cl(child_lba: u32) -> Vec<u8> {
    su_entry(b"CL", &both32(child_lba))
}

#[test]
fn relocated_directories_do_not_share_a_listing() {
    let mut img = Image::new(28);
    img.descriptor(16, 1, 20, None);
    img.terminator(17);
    img.directory(
        20,
        &[
            record(20, 2048, DIR, &[0], &[sp(), er()].concat()),
            record(20, 2048, DIR, &[1], &[]),
            record(0, 0, 0, b"A.;1", &[nm("a"), cl(24)].concat()),
            record(0, 0, 0, b"B.;1", &[nm("b"), cl(25)].concat()),
        ],
    );
    for (sector, file_sector, name) in [(24, 26, "x"), (25, 27, "y")] {
        img.directory(
            sector,
            &[
                record(sector as u32, 2048, DIR, &[0], &[]),
                record(20, 2048, DIR, &[1], &[]),
                record(file_sector, 1, 0, b"F.;1", &nm(name)),
            ],
        );
    }
    img.put(26, b"1");
    img.put(27, b"2");
    let fs = img.build("");

    assert_eq!(fs.readdir("/a").unwrap(), vec!["x"]);
    assert_eq!(fs.readdir("/b").unwrap(), vec!["y"]);
    assert_eq!(fs.read_file("/b/y", FileFlag::Read).unwrap(), b"2");
    assert_eq!(fs.stat("/a", false).unwrap().file_type(), FileType::Directory);
}
