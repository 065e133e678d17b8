//! Path mapping (§4.6): longest-prefix-wins translation in both directions.

use ansibug::pathmap::{PathMapper, PathMapping};

fn mapper() -> PathMapper {
    PathMapper::new(vec![
        PathMapping {
            local_root: "/home/dev/project".to_string(),
            remote_root: "/srv/playbooks".to_string(),
        },
        PathMapping {
            local_root: "/home/dev/project/roles/vendor".to_string(),
            remote_root: "/srv/vendor-roles".to_string(),
        },
    ])
}

#[test]
fn maps_local_to_remote() {
    let mapper = mapper();
    let remote = mapper.to_remote(std::path::Path::new("/home/dev/project/site.yml"));
    assert_eq!(remote, std::path::PathBuf::from("/srv/playbooks/site.yml"));
}

#[test]
fn maps_remote_to_local() {
    let mapper = mapper();
    let local = mapper.to_local(std::path::Path::new("/srv/playbooks/site.yml"));
    assert_eq!(local, std::path::PathBuf::from("/home/dev/project/site.yml"));
}

#[test]
fn longest_prefix_wins() {
    let mapper = mapper();
    let remote = mapper.to_remote(std::path::Path::new(
        "/home/dev/project/roles/vendor/tasks/main.yml",
    ));
    assert_eq!(
        remote,
        std::path::PathBuf::from("/srv/vendor-roles/tasks/main.yml")
    );
}

#[test]
fn unmapped_path_passes_through_unchanged() {
    let mapper = mapper();
    let path = std::path::Path::new("/etc/ansible/ansible.cfg");
    assert_eq!(mapper.to_remote(path), path.to_path_buf());
}

#[test]
fn empty_mapper_is_identity() {
    let mapper = PathMapper::default();
    assert!(mapper.is_empty());
    let path = std::path::Path::new("/anything");
    assert_eq!(mapper.to_remote(path), path.to_path_buf());
    assert_eq!(mapper.to_local(path), path.to_path_buf());
}
