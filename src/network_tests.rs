// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `network.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn slice_with_labels(labels: &[(&str, &str)]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some("foo-abc".to_string()),
                namespace: Some("testns".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: vec![],
            ports: None,
        }
    }

    #[test]
    fn test_default_network_has_no_prefix() {
        let network = NetworkInfo::default_network();
        assert!(network.is_default());
        assert_eq!(network.scoped_name("clusterLBGroup"), "clusterLBGroup");
    }

    #[test]
    fn test_user_defined_prefix_is_sanitized() {
        let network = NetworkInfo::user_defined("tenant-red", NetworkRole::Primary);
        assert_eq!(
            network.scoped_name("clusterLBGroup"),
            "tenant.red_clusterLBGroup"
        );

        let network = NetworkInfo::user_defined("ns1/blue", NetworkRole::Secondary);
        assert_eq!(network.scoped_name("x"), "ns1.blue_x");
    }

    #[test]
    fn test_default_name_collapses_to_default_network() {
        assert_eq!(
            NetworkInfo::user_defined("default", NetworkRole::Primary),
            NetworkInfo::default_network()
        );
        assert_eq!(
            NetworkInfo::user_defined("tenant-red", NetworkRole::Default),
            NetworkInfo::default_network()
        );
    }

    #[test]
    fn test_external_ids_carry_network_and_role() {
        let ids = NetworkInfo::user_defined("tenant-red", NetworkRole::Primary).external_ids();
        assert_eq!(ids.get("k8s.ovn.org/network").unwrap(), "tenant-red");
        assert_eq!(ids.get("k8s.ovn.org/role").unwrap(), "primary");

        let ids = NetworkInfo::default_network().external_ids();
        assert_eq!(ids.get("k8s.ovn.org/network").unwrap(), "default");
        assert_eq!(ids.get("k8s.ovn.org/role").unwrap(), "default");
    }

    #[test]
    fn test_owns_external_ids() {
        let default = NetworkInfo::default_network();
        let red = NetworkInfo::user_defined("tenant-red", NetworkRole::Primary);

        let untagged = BTreeMap::new();
        assert!(default.owns_external_ids(&untagged));
        assert!(!red.owns_external_ids(&untagged));

        let red_ids = red.external_ids();
        assert!(red.owns_external_ids(&red_ids));
        assert!(!default.owns_external_ids(&red_ids));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("primary".parse::<NetworkRole>(), Ok(NetworkRole::Primary));
        assert!("tertiary".parse::<NetworkRole>().is_err());
    }

    #[test]
    fn test_default_network_selects_kubernetes_slices_only() {
        let network = NetworkInfo::default_network();
        let native = slice_with_labels(&[("kubernetes.io/service-name", "foo")]);
        let mirrored = slice_with_labels(&[
            ("k8s.ovn.org/service-name", "foo"),
            ("k8s.ovn.org/endpointslice-network", "tenant-red"),
        ]);
        let other = slice_with_labels(&[("kubernetes.io/service-name", "bar")]);

        assert!(network.selects_endpoint_slice(&native, "foo"));
        assert!(!network.selects_endpoint_slice(&mirrored, "foo"));
        assert!(!network.selects_endpoint_slice(&other, "foo"));
    }

    #[test]
    fn test_user_defined_network_selects_its_mirrored_slices() {
        let network = NetworkInfo::user_defined("tenant-red", NetworkRole::Primary);
        let native = slice_with_labels(&[("kubernetes.io/service-name", "foo")]);
        let mirrored = slice_with_labels(&[
            ("k8s.ovn.org/service-name", "foo"),
            ("k8s.ovn.org/endpointslice-network", "tenant-red"),
        ]);
        let mirrored_elsewhere = slice_with_labels(&[
            ("k8s.ovn.org/service-name", "foo"),
            ("k8s.ovn.org/endpointslice-network", "tenant-blue"),
        ]);

        assert!(!network.selects_endpoint_slice(&native, "foo"));
        assert!(network.selects_endpoint_slice(&mirrored, "foo"));
        assert!(!network.selects_endpoint_slice(&mirrored_elsewhere, "foo"));
    }
}
