use std::io::Write;

use cinder::listeners::profile::load_profile_line;

fn write_profile(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn first_effective_line_is_returned() {
    let file = write_profile(
        "# default communication profile\n\
         \n\
         /index.jsp,/admin/get.php|Mozilla/5.0\n\
         /second-line-ignored\n",
    );
    let line = load_profile_line(file.path()).unwrap();
    assert_eq!(line, "/index.jsp,/admin/get.php|Mozilla/5.0");
}

#[test]
fn surrounding_quotes_are_stripped() {
    let file = write_profile("\"/news.asp|Agent\"\n");
    assert_eq!(load_profile_line(file.path()).unwrap(), "/news.asp|Agent");
}

#[test]
fn comment_only_profile_is_an_error() {
    let file = write_profile("# nothing here\n#still nothing\n\n");
    assert!(load_profile_line(file.path()).is_err());
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_profile_line("/nonexistent/profile.txt").unwrap_err();
    assert!(err.to_string().starts_with("io:"));
}
