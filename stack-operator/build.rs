use std::{
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
};

use serde::Serialize;

const CRD_OUTPUT: &str = "../crd";

fn main() {
    let crd_output = Path::new(CRD_OUTPUT);

    export_v1beta1_crds(crd_output);
}

fn export_v1beta1_crds(path: &Path) {
    use stack_operator_core::resources::crd::v1beta1::v1beta1_crds;

    let version_path = path.join(Path::new("v1beta1"));

    create_dir_all(&version_path).unwrap();
    for crd in v1beta1_crds() {
        let name = crd.metadata.name.clone().unwrap();
        write_serialized(&crd, &get_crd_path(&version_path, &name));
    }
}

fn write_serialized<T: Sized + Serialize>(obj: &T, path: &Path) {
    write(path, serde_yaml::to_string(obj).unwrap()).unwrap();
}

fn get_crd_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(Path::new(&format!("{name}.yaml")))
}
